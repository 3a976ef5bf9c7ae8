//! Duplicate group store: media, alternates groups, false positives, confirmed alternates and
//! potential pairs.
//!
//! These `Database` methods are the only mutators of the duplicate tables. Each compound
//! operation runs inside [`Database::in_transaction`](crate::storage::Database::in_transaction)
//! and joins the caller's transaction when there is one.

mod alternates;
mod media;
mod merge;
mod potentials;
