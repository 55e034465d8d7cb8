//! Client-generated identifiers: a short kind prefix, an underscore, and a
//! lowercase ULID (`sub_01j9...`).

use ulid::Ulid;

/// Well-known ID prefixes.
pub mod prefix {
    /// Broker subscription ids for conversation topics.
    pub const SUBSCRIPTION: &str = "sub";
    /// Client session ids used in logs to tell connection attempts apart.
    pub const SESSION: &str = "ses";
}

/// A kind of identifier minted on the client.
pub trait PrefixedId {
    const PREFIX: &'static str;

    /// Fresh id. Lowercase so it survives case-folding brokers and log greps.
    fn generate() -> String {
        let mut id = String::with_capacity(Self::PREFIX.len() + 1 + 26);
        id.push_str(Self::PREFIX);
        id.push('_');
        id.push_str(&Ulid::new().to_string().to_ascii_lowercase());
        id
    }
}

/// Broker subscription id. The broker echoes it back in the `subscription`
/// header of every MESSAGE frame.
pub struct SubscriptionId;

impl PrefixedId for SubscriptionId {
    const PREFIX: &'static str = prefix::SUBSCRIPTION;
}

/// One connection attempt.
pub struct SessionId;

impl PrefixedId for SessionId {
    const PREFIX: &'static str = prefix::SESSION;
}
