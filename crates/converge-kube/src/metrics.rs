//! Transport wrappers for API client metrics
//!
//! [`ControllerMetricsLayer`] tags every request with the controller that
//! issued it and records per-controller call statistics. Wrappers are
//! installed through a [`TransportChain`], which keeps them ordered and
//! composes each new wrapper over the ones already present.

use futures::future::BoxFuture;
use http::{Method, Request, Response, StatusCode};
use kube::client::{Body, DynBody};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};
use tower::util::BoxService;
use tower::{BoxError, Layer, Service};

/// Who issued a request
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestTag {
    pub controller: String,
    /// Request targets a remote cluster rather than the local one
    pub remote: bool,
}

/// Tags appended by every metrics wrapper a request passed through,
/// outermost first
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestTags(pub Vec<RequestTag>);

/// Coarse response class
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StatusClass {
    Informational,
    Success,
    Redirection,
    ClientError,
    ServerError,
    /// Transport failure, no response
    Error,
}

impl From<StatusCode> for StatusClass {
    fn from(status: StatusCode) -> Self {
        match status.as_u16() {
            100..=199 => StatusClass::Informational,
            200..=299 => StatusClass::Success,
            300..=399 => StatusClass::Redirection,
            400..=499 => StatusClass::ClientError,
            _ => StatusClass::ServerError,
        }
    }
}

impl fmt::Display for StatusClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StatusClass::Informational => "1xx",
            StatusClass::Success => "2xx",
            StatusClass::Redirection => "3xx",
            StatusClass::ClientError => "4xx",
            StatusClass::ServerError => "5xx",
            StatusClass::Error => "error",
        })
    }
}

/// Metric series key
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MetricKey {
    pub controller: String,
    pub remote: bool,
    pub method: String,
    pub status: StatusClass,
}

/// Accumulated statistics of one series
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestStats {
    pub count: u64,
    pub errors: u64,
    pub total_latency: Duration,
}

/// Shared registry the metrics wrappers record into
#[derive(Debug, Clone, Default)]
pub struct RequestMetrics {
    series: Arc<Mutex<BTreeMap<MetricKey, RequestStats>>>,
}

impl RequestMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, key: MetricKey, latency: Duration) {
        let failed = matches!(
            key.status,
            StatusClass::ServerError | StatusClass::Error
        );
        let mut series = self.series.lock().unwrap_or_else(PoisonError::into_inner);
        let stats = series.entry(key).or_default();
        stats.count += 1;
        if failed {
            stats.errors += 1;
        }
        stats.total_latency += latency;
    }

    pub fn snapshot(&self) -> BTreeMap<MetricKey, RequestStats> {
        self.series
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Requests recorded for one controller
    pub fn requests_for(&self, controller: &str) -> u64 {
        self.snapshot()
            .iter()
            .filter(|(k, _)| k.controller == controller)
            .map(|(_, s)| s.count)
            .sum()
    }

    pub fn total_requests(&self) -> u64 {
        self.snapshot().values().map(|s| s.count).sum()
    }
}

/// Layer that tags and measures each request
#[derive(Debug, Clone)]
pub struct ControllerMetricsLayer {
    tag: RequestTag,
    registry: RequestMetrics,
}

impl ControllerMetricsLayer {
    pub fn new(controller: impl Into<String>, remote: bool, registry: RequestMetrics) -> Self {
        Self {
            tag: RequestTag {
                controller: controller.into(),
                remote,
            },
            registry,
        }
    }

    pub fn tag(&self) -> &RequestTag {
        &self.tag
    }
}

impl<S> Layer<S> for ControllerMetricsLayer {
    type Service = ControllerMetrics<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ControllerMetrics {
            inner,
            tag: self.tag.clone(),
            registry: self.registry.clone(),
        }
    }
}

/// Service produced by [`ControllerMetricsLayer`]
#[derive(Debug, Clone)]
pub struct ControllerMetrics<S> {
    inner: S,
    tag: RequestTag,
    registry: RequestMetrics,
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for ControllerMetrics<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>> + 'static,
    S::Future: Send + 'static,
    S::Error: 'static,
    ReqBody: 'static,
    ResBody: 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<S::Response, S::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<ReqBody>) -> Self::Future {
        match req.extensions_mut().get_mut::<RequestTags>() {
            Some(tags) => tags.0.push(self.tag.clone()),
            None => {
                req.extensions_mut()
                    .insert(RequestTags(vec![self.tag.clone()]));
            }
        }

        let method: Method = req.method().clone();
        let tag = self.tag.clone();
        let registry = self.registry.clone();
        let started = Instant::now();
        let response = self.inner.call(req);

        Box::pin(async move {
            let result = response.await;
            let status = match &result {
                Ok(resp) => StatusClass::from(resp.status()),
                Err(_) => StatusClass::Error,
            };
            let elapsed = started.elapsed();
            tracing::debug!(
                controller = %tag.controller,
                remote = tag.remote,
                method = %method,
                status = %status,
                elapsed_ms = elapsed.as_millis() as u64,
                "api request"
            );
            registry.record(
                MetricKey {
                    controller: tag.controller,
                    remote: tag.remote,
                    method: method.to_string(),
                    status,
                },
                elapsed,
            );
            result
        })
    }
}

/// Boxed transport service of a `kube::Client`
pub type TransportService<Req = Request<Body>, Res = Response<Box<DynBody>>> =
    BoxService<Req, Res, BoxError>;

type Wrapper<Req, Res> =
    Arc<dyn Fn(TransportService<Req, Res>) -> TransportService<Req, Res> + Send + Sync>;

/// Ordered list of transport wrappers
///
/// Wrappers are applied in push order, so the most recently pushed one is
/// outermost and sees each request first.
pub struct TransportChain<Req = Request<Body>, Res = Response<Box<DynBody>>> {
    wrappers: Vec<(String, Wrapper<Req, Res>)>,
}

impl<Req, Res> Clone for TransportChain<Req, Res> {
    fn clone(&self) -> Self {
        Self {
            wrappers: self.wrappers.clone(),
        }
    }
}

impl<Req, Res> Default for TransportChain<Req, Res> {
    fn default() -> Self {
        Self {
            wrappers: Vec::new(),
        }
    }
}

impl<Req: 'static, Res: 'static> fmt::Debug for TransportChain<Req, Res> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportChain")
            .field("wrappers", &self.names())
            .finish()
    }
}

impl<Req: 'static, Res: 'static> TransportChain<Req, Res> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a wrapper on top of the existing ones
    pub fn push<L>(&mut self, name: impl Into<String>, layer: L)
    where
        L: Layer<TransportService<Req, Res>> + Send + Sync + 'static,
        L::Service: Service<Req, Response = Res, Error = BoxError> + Send + 'static,
        <L::Service as Service<Req>>::Future: Send + 'static,
    {
        let wrapper: Wrapper<Req, Res> =
            Arc::new(move |service| BoxService::new(layer.layer(service)));
        self.wrappers.push((name.into(), wrapper));
    }

    /// Push the controller metrics wrapper
    pub fn push_metrics(&mut self, layer: ControllerMetricsLayer)
    where
        Req: Send,
        ControllerMetrics<TransportService<Req, Res>>:
            Service<Req, Response = Res, Error = BoxError> + Send + 'static,
        <ControllerMetrics<TransportService<Req, Res>> as Service<Req>>::Future: Send + 'static,
    {
        let name = format!("controller-metrics:{}", layer.tag().controller);
        self.push(name, layer);
    }

    /// Apply every wrapper around `service`
    pub fn wrap(&self, service: TransportService<Req, Res>) -> TransportService<Req, Res> {
        self.wrappers
            .iter()
            .fold(service, |service, (_, wrapper)| wrapper(service))
    }

    pub fn names(&self) -> Vec<&str> {
        self.wrappers.iter().map(|(name, _)| name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.wrappers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.wrappers.is_empty()
    }
}

impl<Req: 'static, Res: 'static> Layer<TransportService<Req, Res>> for TransportChain<Req, Res> {
    type Service = TransportService<Req, Res>;

    fn layer(&self, inner: TransportService<Req, Res>) -> Self::Service {
        self.wrap(inner)
    }
}
