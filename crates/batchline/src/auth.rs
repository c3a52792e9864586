// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Request authentication decorators.
//!
//! The flusher applies the configured [`Auth`] to every outgoing request,
//! fresh on every attempt. Credentials resolved inside a [`Auth::custom`]
//! closure are therefore re-read between retries, so rotating tokens are
//! picked up without restarting the client.

use std::fmt;
use std::sync::Arc;

use reqwest::RequestBuilder;

/// Signature of a caller-supplied request decorator.
pub type AuthFn = Arc<dyn Fn(RequestBuilder) -> RequestBuilder + Send + Sync>;

/// Credential decorator applied to each flush request.
#[derive(Clone, Default)]
pub enum Auth {
    /// Send requests unauthenticated.
    #[default]
    None,
    /// Attach `Authorization: Bearer <token>`.
    Bearer(String),
    /// Attach an HTTP basic-auth header.
    Basic {
        username: String,
        password: Option<String>,
    },
    /// Arbitrary request decoration.
    Custom(AuthFn),
}

impl Auth {
    /// Bearer-token authentication.
    #[must_use]
    pub fn bearer(token: impl Into<String>) -> Self {
        Self::Bearer(token.into())
    }

    /// HTTP basic authentication.
    #[must_use]
    pub fn basic(username: impl Into<String>, password: Option<String>) -> Self {
        Self::Basic {
            username: username.into(),
            password,
        }
    }

    /// Decoration through an arbitrary closure, invoked once per flush
    /// attempt with the request builder about to be sent.
    #[must_use]
    pub fn custom(
        decorate: impl Fn(RequestBuilder) -> RequestBuilder + Send + Sync + 'static,
    ) -> Self {
        Self::Custom(Arc::new(decorate))
    }

    /// Applies this decorator to `request`.
    #[must_use]
    pub fn decorate(&self, request: RequestBuilder) -> RequestBuilder {
        match self {
            Self::None => request,
            Self::Bearer(token) => request.bearer_auth(token),
            Self::Basic { username, password } => request.basic_auth(username, password.as_deref()),
            Self::Custom(decorate) => decorate(request),
        }
    }
}

// Manual impl: the closure variant is not Debug, and credentials must not
// end up in diagnostics.
impl fmt::Debug for Auth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "Auth::None"),
            Self::Bearer(_) => write!(f, "Auth::Bearer(..)"),
            Self::Basic { username, .. } => write!(f, "Auth::Basic({username}, ..)"),
            Self::Custom(_) => write!(f, "Auth::Custom(..)"),
        }
    }
}
