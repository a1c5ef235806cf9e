//! Blocking HTTP transport shared by the vendor bindings: request pacing,
//! 429 backoff with a bounded retry budget, status classification and
//! page-wise fetching.

use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde::Serialize;
use serde::de::DeserializeOwned;

use super::{ApiError, ApiResult};

/// Each rate-limit response stretches the request interval by this factor.
const BACKOFF_FACTOR: f64 = 1.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpSettings {
    pub request_interval: Duration,
    pub max_retries: u32,
    pub timeout: Duration,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            request_interval: Duration::from_millis(100),
            max_retries: 5,
            timeout: Duration::from_secs(30),
        }
    }
}

/// A single authentication header attached to every request.
#[derive(Clone)]
pub struct Auth {
    header: &'static str,
    value: String,
}

impl Auth {
    pub fn header(header: &'static str, value: impl Into<String>) -> Self {
        Self {
            header,
            value: value.into(),
        }
    }

    pub fn basic(user: &str, password: &str) -> Self {
        use base64::Engine as _;
        let encoded = base64::engine::general_purpose::STANDARD.encode(format!("{user}:{password}"));
        Self::header("Authorization", format!("Basic {encoded}"))
    }
}

impl std::fmt::Debug for Auth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Auth")
            .field("header", &self.header)
            .field("value", &"<redacted>")
            .finish()
    }
}

#[derive(Debug)]
struct Pacing {
    interval: Duration,
    last: Option<Instant>,
}

impl Pacing {
    fn wait(&mut self) {
        if let Some(last) = self.last {
            let ready = last + self.interval;
            let now = Instant::now();
            if ready > now {
                std::thread::sleep(ready - now);
            }
        }
        self.last = Some(Instant::now());
    }

    fn slow_down(&mut self) {
        self.interval = self.interval.mul_f64(BACKOFF_FACTOR);
    }
}

pub struct Transport {
    agent: ureq::Agent,
    pacing: Mutex<Pacing>,
    max_retries: u32,
}

impl Transport {
    pub fn new(settings: HttpSettings) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(settings.timeout)
            .user_agent(concat!("timeport/", env!("CARGO_PKG_VERSION")))
            .build();
        Self {
            agent,
            pacing: Mutex::new(Pacing {
                interval: settings.request_interval,
                last: None,
            }),
            max_retries: settings.max_retries,
        }
    }

    fn pacing(&self) -> MutexGuard<'_, Pacing> {
        match self.pacing.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn get<T: DeserializeOwned>(
        &self,
        url: &str,
        auth: &Auth,
        query: &[(&str, String)],
    ) -> ApiResult<T> {
        decode(self.send("GET", url, auth, query, None::<&()>)?)
    }

    pub fn post<B: Serialize, T: DeserializeOwned>(
        &self,
        url: &str,
        auth: &Auth,
        body: &B,
    ) -> ApiResult<T> {
        decode(self.send("POST", url, auth, &[], Some(body))?)
    }

    pub fn put<B: Serialize>(&self, url: &str, auth: &Auth, body: &B) -> ApiResult<()> {
        self.send("PUT", url, auth, &[], Some(body)).map(drop)
    }

    pub fn delete(&self, url: &str, auth: &Auth) -> ApiResult<()> {
        self.send("DELETE", url, auth, &[], None::<&()>).map(drop)
    }

    /// Issue one request, retrying while the service answers 429.
    pub fn send<B: Serialize>(
        &self,
        method: &str,
        url: &str,
        auth: &Auth,
        query: &[(&str, String)],
        body: Option<&B>,
    ) -> ApiResult<ureq::Response> {
        let mut attempts = 0;
        loop {
            self.pacing().wait();
            let mut request = self.agent.request(method, url).set(auth.header, &auth.value);
            for (name, value) in query {
                request = request.query(name, value);
            }
            let result = match body {
                Some(body) => request.send_json(body),
                None => request.call(),
            };

            match result {
                Ok(response) => return Ok(response),
                Err(ureq::Error::Status(429, _)) => {
                    attempts += 1;
                    if attempts > self.max_retries {
                        return Err(ApiError::RateLimited { attempts });
                    }
                    let mut pacing = self.pacing();
                    pacing.slow_down();
                    tracing::warn!(
                        %method,
                        %url,
                        attempts,
                        interval_ms = pacing.interval.as_millis() as u64,
                        "rate limited; backing off"
                    );
                }
                Err(ureq::Error::Status(status, response)) => {
                    let message = response.into_string().unwrap_or_default();
                    return Err(classify(status, message));
                }
                Err(ureq::Error::Transport(transport)) => {
                    return Err(ApiError::Transport(transport.to_string()));
                }
            }
        }
    }
}

fn decode<T: DeserializeOwned>(response: ureq::Response) -> ApiResult<T> {
    response
        .into_json()
        .map_err(|e| ApiError::Decode(e.to_string()))
}

/// Map a non-success status to the error taxonomy.
pub fn classify(status: u16, message: String) -> ApiError {
    match status {
        401 => ApiError::Unauthorized,
        403 => ApiError::Forbidden,
        404 => ApiError::NotFound,
        429 => ApiError::RateLimited { attempts: 1 },
        _ => ApiError::Rejected {
            status,
            message: message.chars().take(200).collect(),
        },
    }
}

/// Fetch numbered pages (starting at 1) until one comes back short.
pub fn paged<T>(
    page_size: usize,
    mut fetch: impl FnMut(u32) -> ApiResult<Vec<T>>,
) -> ApiResult<Vec<T>> {
    let mut all = Vec::new();
    let mut page = 1;
    loop {
        let batch = fetch(page)?;
        let done = batch.len() < page_size;
        all.extend(batch);
        if done {
            return Ok(all);
        }
        page += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_map_onto_the_taxonomy() {
        assert_eq!(classify(401, String::new()), ApiError::Unauthorized);
        assert_eq!(classify(403, String::new()), ApiError::Forbidden);
        assert_eq!(classify(404, String::new()), ApiError::NotFound);
        assert_eq!(
            classify(400, "name already exists".into()),
            ApiError::Rejected {
                status: 400,
                message: "name already exists".into()
            }
        );
    }

    #[test]
    fn rejection_messages_are_truncated() {
        let ApiError::Rejected { message, .. } = classify(500, "x".repeat(1000)) else {
            panic!("expected a rejection");
        };
        assert_eq!(message.len(), 200);
    }

    #[test]
    fn backoff_stretches_interval_by_ten_percent() {
        let mut pacing = Pacing {
            interval: Duration::from_millis(1000),
            last: None,
        };
        pacing.slow_down();
        assert_eq!(pacing.interval, Duration::from_millis(1100));
        pacing.slow_down();
        assert_eq!(pacing.interval, Duration::from_millis(1210));
    }

    #[test]
    fn paging_stops_at_the_first_short_page() {
        let mut requested = Vec::new();
        let all = paged(2, |page| {
            requested.push(page);
            Ok(match page {
                1 => vec![1, 2],
                2 => vec![3, 4],
                _ => vec![5],
            })
        })
        .unwrap();
        assert_eq!(all, [1, 2, 3, 4, 5]);
        assert_eq!(requested, [1, 2, 3]);
    }

    #[test]
    fn paging_propagates_errors() {
        let result: ApiResult<Vec<u8>> = paged(2, |_| Err(ApiError::Unauthorized));
        assert_eq!(result, Err(ApiError::Unauthorized));
    }

    #[test]
    fn basic_auth_encodes_token_and_password() {
        let auth = Auth::basic("token", "api_token");
        assert_eq!(auth.header, "Authorization");
        assert_eq!(auth.value, "Basic dG9rZW46YXBpX3Rva2Vu");
        assert!(!format!("{auth:?}").contains("dG9r"));
    }
}
