//! # tunebridge
//!
//! Desktop companion for Spotify Connect playback.
//!
//! The crate has two halves:
//!
//! * A local backend ([`server`]) that holds the client secret, runs the
//!   OAuth authorization-code flow against the accounts service
//!   ([`auth`]), persists the refresh credential ([`preferences`]) and
//!   forwards playback commands to the Web API ([`api`]).
//! * A desktop-side [`session::Session`] that keeps the current access token
//!   valid, refreshing it single-flight through a [`tokens::TokenProvider`]:
//!   either [`backend::Client`] over HTTP or [`auth::TokenExchange`]
//!   in-process. Remote player states are folded into a UI-facing
//!   [`player::Snapshot`].
//!
//! Errors are classified by [`error::ErrorKind`], each kind mapping onto
//! the HTTP status the backend answers with.
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]

#[macro_use]
extern crate log;

pub mod api;
pub mod auth;
pub mod backend;
pub mod config;
pub mod credentials;
pub mod error;
pub mod events;
pub mod http;
pub mod player;
pub mod preferences;
pub mod server;
pub mod session;
pub mod signal;
pub mod tokens;
pub mod util;
