//! Outgoing HTTP with throttling and timeouts.
//!
//! Every request to the accounts service, the Web API or the local backend
//! goes through [`Client`]. Requests are throttled to stay clear of the Web
//! API's rolling rate limit, and no request can hang longer than
//! [`Client::REQUEST_TIMEOUT`].

use std::{future::Future, num::NonZeroU32, time::Duration};

use futures_util::{FutureExt, TryFutureExt};
use governor::{DefaultDirectRateLimiter, Quota};
use reqwest::{Method, Url};

use crate::{config::Config, error::Result};

pub struct Client {
    inner: reqwest::Client,
    throttle: DefaultDirectRateLimiter,
}

impl Client {
    /// Stays below the Web API's rolling 30 second limit.
    const WINDOW: Duration = Duration::from_secs(5);
    const CALLS_PER_WINDOW: u32 = 50;

    const IDLE_TIMEOUT: Duration = Duration::from_secs(60);
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

    /// # Errors
    ///
    /// Returns `Internal` if the TLS backend fails to initialize.
    ///
    /// # Panics
    ///
    /// Panics if the throttling constants are zero.
    pub fn new(config: &Config) -> Result<Self> {
        let inner = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .pool_idle_timeout(Self::IDLE_TIMEOUT)
            .connect_timeout(Self::CONNECT_TIMEOUT)
            .timeout(Self::REQUEST_TIMEOUT)
            .build()?;

        let burst = NonZeroU32::new(Self::CALLS_PER_WINDOW).expect("calls per window is zero");
        let quota = Quota::with_period(Self::WINDOW / Self::CALLS_PER_WINDOW)
            .expect("replenish period is zero")
            .allow_burst(burst);

        Ok(Self {
            inner,
            throttle: governor::RateLimiter::direct(quota),
        })
    }

    /// Starts a request. Hand the builder to [`send`](Self::send) so that
    /// it is throttled.
    pub fn request(&self, method: Method, url: Url) -> reqwest::RequestBuilder {
        self.inner.request(method, url)
    }

    /// Sends a request once the throttle admits it.
    ///
    /// Non-success statuses are returned as responses, not errors.
    ///
    /// # Errors
    ///
    /// `Internal` if the request cannot be built, `UpstreamUnreachable` if
    /// it fails on the network or times out.
    pub async fn send(&self, builder: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        let request = builder.build()?;
        self.execute(request).await
    }

    fn execute(
        &self,
        request: reqwest::Request,
    ) -> impl Future<Output = Result<reqwest::Response>> + '_ {
        trace!("{} {}", request.method(), request.url().path());
        self.throttle
            .until_ready()
            .then(move |()| self.inner.execute(request).map_err(Into::into))
    }
}
