//! Directory resources and resource status values.

use std::fmt;

/// The resources a directory document can advertise.
///
/// See [RFC 8555 §7.1.1].
///
/// [RFC 8555 §7.1.1]: https://datatracker.ietf.org/doc/html/rfc8555#section-7.1.1
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resource {
    NewNonce,
    NewAccount,
    NewOrder,
    NewAuthz,
    RevokeCert,
    KeyChange,
}

impl Resource {
    pub const ALL: [Resource; 6] = [
        Resource::NewNonce,
        Resource::NewAccount,
        Resource::NewOrder,
        Resource::NewAuthz,
        Resource::RevokeCert,
        Resource::KeyChange,
    ];

    /// The directory key this resource is listed under.
    pub fn path(&self) -> &'static str {
        match self {
            Resource::NewNonce => "newNonce",
            Resource::NewAccount => "newAccount",
            Resource::NewOrder => "newOrder",
            Resource::NewAuthz => "newAuthz",
            Resource::RevokeCert => "revokeCert",
            Resource::KeyChange => "keyChange",
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}

/// Status of a server-side resource.
///
/// Covers the union of account, order, authorization and challenge states.
/// Status strings this client does not know map to [`Status::Unknown`]
/// rather than failing, so newer servers stay usable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Status {
    Pending,
    Processing,
    Valid,
    Invalid,
    Revoked,
    Deactivated,
    Expired,
    #[default]
    Unknown,
}

impl Status {
    /// Maps a status string to its variant, tolerating unknown values.
    pub fn parse(value: Option<&str>) -> Status {
        match value {
            Some("pending") => Status::Pending,
            Some("processing") => Status::Processing,
            Some("valid") => Status::Valid,
            Some("invalid") => Status::Invalid,
            Some("revoked") => Status::Revoked,
            Some("deactivated") => Status::Deactivated,
            Some("expired") => Status::Expired,
            _ => Status::Unknown,
        }
    }

    /// Whether the server will never move the resource out of this state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Status::Valid
                | Status::Invalid
                | Status::Revoked
                | Status::Deactivated
                | Status::Expired
        )
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Status::Pending => "pending",
            Status::Processing => "processing",
            Status::Valid => "valid",
            Status::Invalid => "invalid",
            Status::Revoked => "revoked",
            Status::Deactivated => "deactivated",
            Status::Expired => "expired",
            Status::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_paths_match_directory_keys() {
        assert_eq!(Resource::NewNonce.path(), "newNonce");
        assert_eq!(Resource::NewAccount.path(), "newAccount");
        assert_eq!(Resource::NewOrder.path(), "newOrder");
        assert_eq!(Resource::NewAuthz.path(), "newAuthz");
        assert_eq!(Resource::RevokeCert.path(), "revokeCert");
        assert_eq!(Resource::KeyChange.path(), "keyChange");
    }

    #[test]
    fn status_parsing_is_unknown_tolerant() {
        assert_eq!(Status::parse(Some("pending")), Status::Pending);
        assert_eq!(Status::parse(Some("valid")), Status::Valid);
        assert_eq!(Status::parse(Some("whatever-new")), Status::Unknown);
        assert_eq!(Status::parse(None), Status::Unknown);
    }

    #[test]
    fn terminal_states() {
        assert!(Status::Valid.is_terminal());
        assert!(Status::Invalid.is_terminal());
        assert!(Status::Revoked.is_terminal());
        assert!(Status::Deactivated.is_terminal());
        assert!(Status::Expired.is_terminal());
        assert!(!Status::Pending.is_terminal());
        assert!(!Status::Processing.is_terminal());
        assert!(!Status::Unknown.is_terminal());
    }
}
