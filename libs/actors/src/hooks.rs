//! Pre-dispatch hooks
//!
//! Every call and subscription passes Validation → Authentication →
//! Authorization → RateLimit, in that order. The first rejection wins and
//! the method never runs.

use async_trait::async_trait;
use codec::{ActorId, ErrorDescriptor, CREDENTIALS_KEY};
use governor::clock::{Clock, DefaultClock};
use governor::{DefaultKeyedRateLimiter, Quota};
use nonzero_ext::nonzero;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Identity attached to a call after authentication
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Principal {
    pub name: String,
}

impl Principal {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// Principal of calls made without an authenticator
    pub fn anonymous() -> Self {
        Self::new("anonymous")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Invoke,
    Subscribe,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    pub actor_id: ActorId,
    pub target: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed,
    Limited { retry_after: Option<Duration> },
}

/// What the hooks see of an incoming call or subscription
#[derive(Debug, Clone, Copy)]
pub struct CallRequest<'a> {
    pub actor_id: &'a ActorId,
    pub target: &'a str,
    pub action: Action,
    pub metadata: &'a BTreeMap<String, String>,
    pub payload_size: usize,
    pub peer: Option<&'a str>,
}

impl CallRequest<'_> {
    pub fn credentials(&self) -> Option<&str> {
        self.metadata.get(CREDENTIALS_KEY).map(String::as_str)
    }
}

#[async_trait]
pub trait Validator: Send + Sync {
    async fn validate(&self, request: &CallRequest<'_>) -> Result<(), ErrorDescriptor>;
}

#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Resolve credentials to a principal, or explain the refusal
    async fn authenticate(&self, credentials: Option<&str>) -> Result<Principal, String>;
}

#[async_trait]
pub trait Authorizer: Send + Sync {
    async fn authorize(&self, principal: &Principal, action: Action, resource: &Resource) -> bool;
}

pub trait RateLimiter: Send + Sync {
    fn check(&self, key: &str) -> RateDecision;
}

/// Ordered set of optional hooks
#[derive(Clone, Default)]
pub struct HookChain {
    validator: Option<Arc<dyn Validator>>,
    authenticator: Option<Arc<dyn Authenticator>>,
    authorizer: Option<Arc<dyn Authorizer>>,
    rate_limiter: Option<Arc<dyn RateLimiter>>,
}

impl HookChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_validator(mut self, validator: Arc<dyn Validator>) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn with_authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.authenticator = Some(authenticator);
        self
    }

    pub fn with_authorizer(mut self, authorizer: Arc<dyn Authorizer>) -> Self {
        self.authorizer = Some(authorizer);
        self
    }

    pub fn with_rate_limiter(mut self, rate_limiter: Arc<dyn RateLimiter>) -> Self {
        self.rate_limiter = Some(rate_limiter);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.validator.is_none()
            && self.authenticator.is_none()
            && self.authorizer.is_none()
            && self.rate_limiter.is_none()
    }

    /// Run every configured hook, returning the caller's principal
    pub async fn check(&self, request: &CallRequest<'_>) -> Result<Principal, ErrorDescriptor> {
        if let Some(validator) = &self.validator {
            validator.validate(request).await?;
        }

        let principal = match &self.authenticator {
            Some(authenticator) => authenticator
                .authenticate(request.credentials())
                .await
                .map_err(|message| ErrorDescriptor::Authentication { message })?,
            None => Principal::anonymous(),
        };

        if let Some(authorizer) = &self.authorizer {
            let resource = Resource {
                actor_id: request.actor_id.clone(),
                target: request.target.to_string(),
            };
            if !authorizer.authorize(&principal, request.action, &resource).await {
                return Err(ErrorDescriptor::Authorization {
                    message: format!(
                        "'{}' may not {:?} {}::{}",
                        principal.name, request.action, request.actor_id, request.target
                    ),
                });
            }
        }

        if let Some(limiter) = &self.rate_limiter {
            let key = match (&self.authenticator, request.peer) {
                (None, Some(peer)) => peer,
                _ => principal.name.as_str(),
            };
            if let RateDecision::Limited { retry_after } = limiter.check(key) {
                debug!(key, "Call rate limited");
                return Err(ErrorDescriptor::RateLimited {
                    retry_after_ms: retry_after.map(|d| d.as_millis() as u64),
                });
            }
        }

        Ok(principal)
    }
}

impl fmt::Debug for HookChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookChain")
            .field("validator", &self.validator.is_some())
            .field("authenticator", &self.authenticator.is_some())
            .field("authorizer", &self.authorizer.is_some())
            .field("rate_limiter", &self.rate_limiter.is_some())
            .finish()
    }
}

/// Rejects calls whose encoded arguments exceed `max_bytes`
#[derive(Debug, Clone)]
pub struct SizeLimitValidator {
    max_bytes: usize,
}

impl SizeLimitValidator {
    pub fn new(max_bytes: usize) -> Self {
        Self { max_bytes }
    }
}

#[async_trait]
impl Validator for SizeLimitValidator {
    async fn validate(&self, request: &CallRequest<'_>) -> Result<(), ErrorDescriptor> {
        if request.payload_size > self.max_bytes {
            return Err(ErrorDescriptor::Validation {
                message: "payload exceeds size limit".to_string(),
                size: request.payload_size,
                limit: self.max_bytes,
            });
        }
        if request.target.is_empty() {
            return Err(ErrorDescriptor::Validation {
                message: "empty target identifier".to_string(),
                size: 0,
                limit: self.max_bytes,
            });
        }
        Ok(())
    }
}

/// Static bearer token → principal table
#[derive(Debug, Clone, Default)]
pub struct TokenAuthenticator {
    tokens: HashMap<String, String>,
}

impl TokenAuthenticator {
    pub fn new<I, T, P>(tokens: I) -> Self
    where
        I: IntoIterator<Item = (T, P)>,
        T: Into<String>,
        P: Into<String>,
    {
        Self {
            tokens: tokens
                .into_iter()
                .map(|(token, principal)| (token.into(), principal.into()))
                .collect(),
        }
    }
}

#[async_trait]
impl Authenticator for TokenAuthenticator {
    async fn authenticate(&self, credentials: Option<&str>) -> Result<Principal, String> {
        let credentials = credentials.ok_or_else(|| "missing credentials".to_string())?;
        let token = credentials.strip_prefix("Bearer ").unwrap_or(credentials).trim();
        self.tokens
            .get(token)
            .map(Principal::new)
            .ok_or_else(|| "unknown token".to_string())
    }
}

/// Principal → permitted actor ids; `*` permits every actor
#[derive(Debug, Clone, Default)]
pub struct AllowListAuthorizer {
    rules: HashMap<String, HashSet<String>>,
}

impl AllowListAuthorizer {
    pub const WILDCARD: &'static str = "*";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn allow(mut self, principal: impl Into<String>, actors: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.rules
            .entry(principal.into())
            .or_default()
            .extend(actors.into_iter().map(Into::into));
        self
    }
}

#[async_trait]
impl Authorizer for AllowListAuthorizer {
    async fn authorize(&self, principal: &Principal, _action: Action, resource: &Resource) -> bool {
        self.rules.get(&principal.name).is_some_and(|actors| {
            actors.contains(Self::WILDCARD) || actors.contains(resource.actor_id.as_str())
        })
    }
}

/// Token bucket per key, backed by governor
pub struct TokenBucketLimiter {
    limiter: DefaultKeyedRateLimiter<String>,
    clock: DefaultClock,
}

impl TokenBucketLimiter {
    /// `per_second` sustained calls with bursts up to `burst`; zero values
    /// are raised to one
    pub fn new(per_second: u32, burst: u32) -> Self {
        let rate = NonZeroU32::new(per_second).unwrap_or(nonzero!(1u32));
        let burst = NonZeroU32::new(burst).unwrap_or(rate);
        Self {
            limiter: DefaultKeyedRateLimiter::keyed(Quota::per_second(rate).allow_burst(burst)),
            clock: DefaultClock::default(),
        }
    }
}

impl RateLimiter for TokenBucketLimiter {
    fn check(&self, key: &str) -> RateDecision {
        match self.limiter.check_key(&key.to_string()) {
            Ok(()) => RateDecision::Allowed,
            Err(not_until) => RateDecision::Limited {
                retry_after: Some(not_until.wait_time_from(self.clock.now())),
            },
        }
    }
}

impl fmt::Debug for TokenBucketLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenBucketLimiter")
            .field("keys", &self.limiter.len())
            .finish()
    }
}
