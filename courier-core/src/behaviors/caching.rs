use crate::behavior::{Next, PipelineBehavior};
use crate::error::DispatchResult;
use crate::handler::RequestContext;
use crate::request::{AnyRequest, AnyResponse, Request, RequestDescriptor};
use async_trait::async_trait;
use lru::LruCache;
use parking_lot::Mutex;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

type KeyFn = Arc<dyn Fn(&(dyn Any + Send + Sync)) -> Option<String> + Send + Sync>;
type ResponseCloner = fn(&(dyn Any + Send)) -> Option<AnyResponse>;

struct CachePolicy {
    key: KeyFn,
    clone_response: ResponseCloner,
    ttl: Duration,
}

struct CacheEntry {
    value: AnyResponse,
    expires_at: Instant,
}

/// Memoizes responses of selected request types.
///
/// Entries are keyed by request type and a caller-supplied key, evicted
/// least-recently-used once `capacity` is reached, and expire after their
/// TTL. Failures are never cached.
///
/// ```rust,ignore
/// let caching = CachingBehavior::new(NonZeroUsize::new(1024).unwrap(), Duration::from_secs(60))
///     .cache::<GetProduct, _>(|query| query.sku.clone());
/// ```
pub struct CachingBehavior {
    cache: Mutex<LruCache<(TypeId, String), CacheEntry>>,
    policies: HashMap<TypeId, CachePolicy>,
    default_ttl: Duration,
}

impl CachingBehavior {
    /// Create a cache holding at most `capacity` responses.
    pub fn new(capacity: NonZeroUsize, default_ttl: Duration) -> Self {
        Self {
            cache: Mutex::new(LruCache::new(capacity)),
            policies: HashMap::new(),
            default_ttl,
        }
    }

    /// Cache responses of `R` under `key(request)` for the default TTL.
    pub fn cache<R, F>(self, key: F) -> Self
    where
        R: Request,
        R::Response: Clone,
        F: Fn(&R) -> String + Send + Sync + 'static,
    {
        let ttl = self.default_ttl;
        self.cache_for::<R, F>(ttl, key)
    }

    /// Cache responses of `R` under `key(request)` for `ttl`.
    pub fn cache_for<R, F>(mut self, ttl: Duration, key: F) -> Self
    where
        R: Request,
        R::Response: Clone,
        F: Fn(&R) -> String + Send + Sync + 'static,
    {
        let key_of: KeyFn = Arc::new(move |request: &(dyn Any + Send + Sync)| {
            request.downcast_ref::<R>().map(&key)
        });
        self.policies.insert(
            TypeId::of::<R>(),
            CachePolicy {
                key: key_of,
                clone_response: clone_response::<R>,
                ttl,
            },
        );
        self
    }

    /// Drop the cached response of `R` for `key`.
    pub fn invalidate<R: Request>(&self, key: &str) -> bool {
        self.cache
            .lock()
            .pop(&(TypeId::of::<R>(), key.to_string()))
            .is_some()
    }

    /// Drop every cached response.
    pub fn clear(&self) {
        self.cache.lock().clear();
    }

    /// Number of cached responses, including expired ones not yet evicted.
    pub fn len(&self) -> usize {
        self.cache.lock().len()
    }

    /// Check if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lookup(&self, entry_key: &(TypeId, String), policy: &CachePolicy) -> Option<AnyResponse> {
        let mut cache = self.cache.lock();
        let entry = cache.get(entry_key)?;
        if entry.expires_at <= Instant::now() {
            cache.pop(entry_key);
            return None;
        }
        (policy.clone_response)(&*entry.value)
    }

    fn store(&self, entry_key: (TypeId, String), response: &AnyResponse, policy: &CachePolicy) {
        if let Some(value) = (policy.clone_response)(&**response) {
            self.cache.lock().put(
                entry_key,
                CacheEntry {
                    value,
                    expires_at: Instant::now() + policy.ttl,
                },
            );
        }
    }
}

fn clone_response<R>(response: &(dyn Any + Send)) -> Option<AnyResponse>
where
    R: Request,
    R::Response: Clone,
{
    response
        .downcast_ref::<R::Response>()
        .map(|response| Box::new(response.clone()) as AnyResponse)
}

#[async_trait]
impl PipelineBehavior for CachingBehavior {
    fn name(&self) -> &'static str {
        "caching"
    }

    fn applies_to(&self, descriptor: &RequestDescriptor) -> bool {
        self.policies.contains_key(&descriptor.type_id)
    }

    async fn handle(
        &self,
        request: AnyRequest,
        ctx: RequestContext,
        next: Next,
    ) -> DispatchResult<AnyResponse> {
        let descriptor = *ctx.descriptor();
        let Some(policy) = self.policies.get(&descriptor.type_id) else {
            return next.run(request, ctx).await;
        };
        let Some(key) = (policy.key)(&*request) else {
            return next.run(request, ctx).await;
        };
        let entry_key = (descriptor.type_id, key);

        if let Some(hit) = self.lookup(&entry_key, policy) {
            debug!(request = descriptor.type_name, key = %entry_key.1, "Cache hit");
            return Ok(hit);
        }

        let response = next.run(request, ctx).await?;
        self.store(entry_key, &response, policy);
        Ok(response)
    }
}
