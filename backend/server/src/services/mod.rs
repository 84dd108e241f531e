//! Business operations behind the HTTP handlers. Every mutating call takes the
//! acting [`Principal`](crate::auth::Principal) explicitly.
pub mod game;
pub mod requests;
pub mod users;
