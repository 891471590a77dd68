use std::collections::HashSet;
use std::fmt;

/// The caller of a session, as identified by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Peer {
    /// Same host, e.g. over a unix socket.
    Local,
    /// A remote client identified by its public key id.
    Remote(String),
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Peer::Local => f.write_str("local"),
            Peer::Remote(id) => f.write_str(id),
        }
    }
}

pub trait PeerAuth: Send + Sync {
    fn authorize(&self, peer: &Peer) -> bool;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

impl PeerAuth for AllowAll {
    fn authorize(&self, _peer: &Peer) -> bool {
        true
    }
}

/// Local peers plus the remote peers listed at startup.
#[derive(Debug, Default, Clone)]
pub struct AuthorizedPeers {
    ids: HashSet<String>,
}

impl AuthorizedPeers {
    pub fn new<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            ids: ids.into_iter().map(Into::into).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

impl PeerAuth for AuthorizedPeers {
    fn authorize(&self, peer: &Peer) -> bool {
        match peer {
            Peer::Local => true,
            Peer::Remote(id) => self.ids.contains(id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_authorized_peers() {
        let auth = AuthorizedPeers::new(["12D3KooWA", "12D3KooWB"]);

        assert!(auth.authorize(&Peer::Local));
        assert!(auth.authorize(&Peer::Remote("12D3KooWB".to_string())));
        assert!(!auth.authorize(&Peer::Remote("12D3KooWC".to_string())));
        assert_eq!(auth.len(), 2);
    }

    #[test]
    fn test_no_remote_peers_by_default() {
        let auth = AuthorizedPeers::default();
        assert!(auth.is_empty());
        assert!(!auth.authorize(&Peer::Remote("12D3KooWA".to_string())));
        assert!(AllowAll.authorize(&Peer::Remote("12D3KooWA".to_string())));
    }
}
