//! Authentication and authorization.
//!
//! # Authentication
//!
//! Users sign in through the campus OAuth2 provider:
//! - `/oauth/login` redirects to the provider with a random `state` held in a signed cookie
//! - `/oauth/callback` validates the state, fetches the profile, finds or creates the local
//!   account and redirects to the frontend with a signed access token
//!
//! API requests then carry the token in `Authorization: Bearer <token>`. Tokens are HS256 JWTs
//! whose claims hold the user id, display name and [`Role`](crate::types::Role).
//!
//! # Authorization
//!
//! The role is the only authorization input. Ownership and staff checks live with the booking
//! rules in [`crate::booking::policy`].
//!
//! # Modules
//!
//! - [`current_user`]: Extractors for the authenticated (or anonymous) caller
//! - [`oauth`]: Provider redirect, state checking, code exchange and profile lookup
//! - [`session`]: Access token issue and verification
//!
//! # Usage in Handlers
//!
//! ```ignore
//! use roombook::auth::current_user::{CurrentUser, MaybeUser};
//!
//! async fn protected(user: CurrentUser) -> String {
//!     format!("Hello, {}!", user.name)
//! }
//!
//! async fn public(MaybeUser(user): MaybeUser) -> String {
//!     user.map(|u| u.name).unwrap_or_else(|| "anonymous".to_string())
//! }
//! ```

pub mod current_user;
pub mod oauth;
pub mod session;
