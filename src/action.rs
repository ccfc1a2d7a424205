use std::future::Future;

use crate::error::ActionError;

/// The unit of work a virtual user performs repeatedly.
///
/// An action performs one request against the system under test and reports
/// whether it succeeded. It does not measure itself: timing, per-action
/// timeouts and recording are handled by the virtual user running it.
///
/// Any async closure returning `Result<(), ActionError>` is an action:
///
/// ```rust
/// use surge::{Action, error::ActionError};
///
/// fn assert_action<A: Action>(_: A) {}
///
/// assert_action(|| async { Ok::<(), ActionError>(()) });
/// ```
///
/// Never instantiate heavy objects like HTTP clients inside the action. Build
/// them once and clone the handle into the closure.
pub trait Action: Send + Sync + 'static {
    fn execute(&self) -> impl Future<Output = Result<(), ActionError>> + Send;
}

impl<F, Fut> Action for F
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), ActionError>> + Send,
{
    fn execute(&self) -> impl Future<Output = Result<(), ActionError>> + Send {
        self()
    }
}

#[cfg(feature = "builtins")]
pub use builtins::*;

#[cfg(feature = "builtins")]
mod builtins {
    use super::*;
    use reqwest::{Client, Method, StatusCode, header::HeaderMap};
    use typed_builder::TypedBuilder;

    /// Built-in action performing a single HTTP request.
    ///
    /// The response body is read to completion so the measured latency covers
    /// the whole exchange.
    ///
    /// - transport failures and body read errors are [`ActionError::Network`],
    /// - client timeouts are [`ActionError::Timeout`],
    /// - 4xx and 5xx responses are [`ActionError::Protocol`].
    #[derive(Debug, Clone, TypedBuilder)]
    pub struct HttpAction {
        #[builder(default)]
        pub client: Client,
        #[builder(setter(into))]
        pub url: String,
        #[builder(default = Method::GET)]
        pub method: Method,
        #[builder(default)]
        pub headers: HeaderMap,
        #[builder(default, setter(strip_option, into))]
        pub body: Option<String>,
    }

    impl HttpAction {
        pub(crate) fn classify_reqwest(err: &reqwest::Error) -> ActionError {
            if err.is_timeout() {
                ActionError::Timeout
            } else if let Some(status) = err.status() {
                ActionError::Protocol(format!("HTTP {status}"))
            } else if err.is_decode() {
                ActionError::Protocol(err.to_string())
            } else {
                ActionError::Network(err.to_string())
            }
        }

        pub(crate) fn classify_status(status: StatusCode) -> Result<(), ActionError> {
            if status.is_client_error() || status.is_server_error() {
                Err(ActionError::Protocol(format!("HTTP {status}")))
            } else {
                Ok(())
            }
        }
    }

    impl Action for HttpAction {
        fn execute(&self) -> impl Future<Output = Result<(), ActionError>> + Send {
            let mut request = self
                .client
                .request(self.method.clone(), &self.url)
                .headers(self.headers.clone());
            if let Some(body) = &self.body {
                request = request.body(body.clone());
            }

            async move {
                let response = request
                    .send()
                    .await
                    .map_err(|e| Self::classify_reqwest(&e))?;
                let status = response.status();
                response
                    .bytes()
                    .await
                    .map_err(|e| Self::classify_reqwest(&e))?;
                Self::classify_status(status)
            }
        }
    }
}
