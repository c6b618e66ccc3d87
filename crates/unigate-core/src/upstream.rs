//! The concrete HTTP forwarder. One `send` issues one upstream request with
//! stream-receive enabled and hands back either a buffered body or a live
//! chunk relay.
//!
//! wreq clients are cached per (proxy, timeout, streaming) key: the per-call
//! timeout bounds connect/write/pool for every request and reads only for
//! non-streaming ones; a streaming request keeps its read window unbounded.
//! The cache means a config reload never touches connections already in
//! flight; they finish on the client they started with.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use wreq::{Client, Method, Proxy};

use unigate_provider::{
    Headers, HttpMethod, UpstreamBody, UpstreamClient, UpstreamError, UpstreamRequest,
    UpstreamResponse, header_get,
};

use crate::intent::should_stream_response;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ClientKey {
    proxy: Option<String>,
    timeout_ms: u64,
    streaming: bool,
}

pub struct WreqUpstreamClient {
    proxy_resolver: Arc<dyn Fn() -> Option<String> + Send + Sync>,
    clients: Mutex<HashMap<ClientKey, Client>>,
}

impl WreqUpstreamClient {
    pub fn new(proxy: Option<String>) -> Self {
        Self::with_proxy_resolver(move || proxy.clone())
    }

    /// The resolver is consulted per request, so a reloaded `preferences.proxy`
    /// takes effect without rebuilding this client.
    pub fn with_proxy_resolver<F>(proxy_resolver: F) -> Self
    where
        F: Fn() -> Option<String> + Send + Sync + 'static,
    {
        Self {
            proxy_resolver: Arc::new(proxy_resolver),
            clients: Mutex::new(HashMap::new()),
        }
    }

    fn client_for(&self, key: ClientKey) -> Result<Client, UpstreamError> {
        let mut guard = self.clients.lock().map_err(|_| {
            UpstreamError::new("upstream client cache lock failed")
        })?;
        if let Some(client) = guard.get(&key) {
            return Ok(client.clone());
        }
        let client = build_client(&key).map_err(map_wreq_error)?;
        guard.insert(key, client.clone());
        Ok(client)
    }
}

fn normalize_proxy(value: Option<String>) -> Option<String> {
    let trimmed = value.as_deref()?.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn build_client(key: &ClientKey) -> Result<Client, wreq::Error> {
    let timeout = Duration::from_millis(key.timeout_ms);
    let mut builder = Client::builder().connect_timeout(timeout);
    if !key.streaming {
        builder = builder.timeout(timeout).read_timeout(timeout);
    }
    if let Some(proxy) = &key.proxy {
        builder = builder.proxy(Proxy::all(proxy)?);
    }
    builder.build()
}

impl UpstreamClient for WreqUpstreamClient {
    fn send<'a>(
        &'a self,
        req: UpstreamRequest,
    ) -> Pin<Box<dyn Future<Output = Result<UpstreamResponse, UpstreamError>> + Send + 'a>> {
        Box::pin(async move {
            let key = ClientKey {
                proxy: normalize_proxy((self.proxy_resolver)()),
                timeout_ms: req.timeout.as_millis() as u64,
                streaming: req.want_stream,
            };
            let client = self.client_for(key)?;

            let url = url_with_query(&req.url, &req.query)?;
            let mut builder = client.request(to_wreq_method(req.method), &url);
            for (name, value) in &req.headers {
                builder = builder.header(name, value);
            }
            if let Some(body) = req.body {
                builder = builder.body(body);
            }

            let accept = header_get(&req.headers, "accept").map(|value| value.to_string());
            let resp = builder.send().await.map_err(map_wreq_error)?;
            convert_response(resp, accept.as_deref()).await
        })
    }
}

fn to_wreq_method(method: HttpMethod) -> Method {
    match method {
        HttpMethod::Get => Method::GET,
        HttpMethod::Post => Method::POST,
        HttpMethod::Put => Method::PUT,
        HttpMethod::Patch => Method::PATCH,
        HttpMethod::Delete => Method::DELETE,
        HttpMethod::Head => Method::HEAD,
        HttpMethod::Options => Method::OPTIONS,
    }
}

fn url_with_query(url: &str, query: &[(String, String)]) -> Result<String, UpstreamError> {
    if query.is_empty() {
        return Ok(url.to_string());
    }
    let encoded = serde_urlencoded::to_string(query)
        .map_err(|err| UpstreamError::new(format!("query encoding failed: {err}")))?;
    let separator = if url.contains('?') { '&' } else { '?' };
    Ok(format!("{url}{separator}{encoded}"))
}

async fn convert_response(
    resp: wreq::Response,
    inbound_accept: Option<&str>,
) -> Result<UpstreamResponse, UpstreamError> {
    let status = resp.status().as_u16();
    let headers = headers_from_wreq(resp.headers());

    if status < 400 && should_stream_response(&headers, inbound_accept) {
        let (tx, rx) = mpsc::channel::<Bytes>(16);
        tokio::spawn(relay_stream(resp, tx));
        return Ok(UpstreamResponse {
            status,
            headers,
            body: UpstreamBody::Stream(rx),
        });
    }

    let body = resp.bytes().await.map_err(map_wreq_error)?;
    Ok(UpstreamResponse {
        status,
        headers,
        body: UpstreamBody::Bytes(body),
    })
}

/// Relays upstream chunks until the body ends, the upstream errors, or the
/// receiver is dropped (client disconnect); every path drops `resp`, closing
/// the upstream connection.
async fn relay_stream(resp: wreq::Response, tx: mpsc::Sender<Bytes>) {
    let mut stream = resp.bytes_stream();
    while let Some(item) = stream.next().await {
        let Ok(chunk) = item else {
            break;
        };
        if tx.send(chunk).await.is_err() {
            break;
        }
    }
}

fn headers_from_wreq(map: &wreq::header::HeaderMap) -> Headers {
    map.iter()
        .filter_map(|(name, value)| {
            let value = value.to_str().ok()?;
            Some((name.as_str().to_string(), value.to_string()))
        })
        .collect()
}

/// Every wreq error is retryable from the dispatcher's point of view; the
/// label only makes the recorded failure reason readable. wreq's own
/// predicates carry enough distinction, the message has the rest.
fn map_wreq_error(err: wreq::Error) -> UpstreamError {
    let label = if err.is_timeout() {
        "timeout"
    } else if err.is_connect() {
        "connect error"
    } else {
        "transport error"
    };
    UpstreamError::new(format!("{label}: {err}"))
}
