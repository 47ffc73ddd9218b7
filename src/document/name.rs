//! Document naming (SPEC_FULL.md §6):
//!
//! - `/threads/<base-thread-id>/host/<host-thread-id>/state`
//! - `/threads/<base-thread-id>/slave/<host-thread-id>/<peer-uri>/<location-id>`
//! - `/threads/<base-thread-id>/contacts/<peer-uri>`
//!
//! The final path segment is a document version in the wire protocol; the
//! engine only ever parses the routing segments above it.

use crate::error::NameError;
use crate::ids::{BaseThreadId, HostThreadId, LocationId, PeerUri};
use crate::repository::DocumentName;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedName {
    Host {
        base: BaseThreadId,
        host: HostThreadId,
    },
    Slave {
        base: BaseThreadId,
        host: HostThreadId,
        peer: PeerUri,
        location: LocationId,
    },
    Contact {
        base: BaseThreadId,
        peer: PeerUri,
    },
}

pub fn host_document_name(base: &BaseThreadId, host: &HostThreadId) -> DocumentName {
    DocumentName(format!("/threads/{base}/host/{host}/state"))
}

pub fn slave_document_name(
    base: &BaseThreadId,
    host: &HostThreadId,
    peer: &PeerUri,
    location: &LocationId,
) -> DocumentName {
    DocumentName(format!("/threads/{base}/slave/{host}/{peer}/{location}"))
}

pub fn contact_document_name(base: &BaseThreadId, peer: &PeerUri) -> DocumentName {
    DocumentName(format!("/threads/{base}/contacts/{peer}"))
}

pub fn parse(name: &DocumentName) -> Result<ParsedName, NameError> {
    let segments: Vec<&str> = name.0.split('/').filter(|s| !s.is_empty()).collect();
    // ["threads", base, kind, ...]
    if segments.len() < 3 || segments[0] != "threads" {
        return Err(NameError::TooShort(name.0.clone()));
    }
    let base = BaseThreadId::from(segments[1]);
    match segments[2] {
        "host" => {
            let host = segments
                .get(3)
                .ok_or_else(|| NameError::TooShort(name.0.clone()))?;
            Ok(ParsedName::Host {
                base,
                host: HostThreadId::from(*host),
            })
        }
        "slave" => {
            if segments.len() < 6 {
                return Err(NameError::TooShort(name.0.clone()));
            }
            Ok(ParsedName::Slave {
                base,
                host: HostThreadId::from(segments[3]),
                peer: PeerUri::from(segments[4]),
                location: LocationId::from(segments[5]),
            })
        }
        "contacts" => {
            let peer = segments
                .get(3)
                .ok_or_else(|| NameError::TooShort(name.0.clone()))?;
            Ok(ParsedName::Contact {
                base,
                peer: PeerUri::from(*peer),
            })
        }
        other => Err(NameError::UnknownThreadType(name.0.clone(), other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_name_roundtrips() {
        let base = BaseThreadId::from("b1");
        let host = HostThreadId::from("h1");
        let name = host_document_name(&base, &host);
        assert_eq!(name.0, "/threads/b1/host/h1/state");
        assert_eq!(parse(&name).unwrap(), ParsedName::Host { base, host });
    }

    #[test]
    fn slave_name_roundtrips() {
        let base = BaseThreadId::from("b1");
        let host = HostThreadId::from("h1");
        let peer = PeerUri::from("peer:alice");
        let loc = LocationId::from("loc1");
        let name = slave_document_name(&base, &host, &peer, &loc);
        assert_eq!(
            parse(&name).unwrap(),
            ParsedName::Slave {
                base,
                host,
                peer,
                location: loc
            }
        );
    }

    #[test]
    fn contact_name_roundtrips() {
        let base = BaseThreadId::from("b1");
        let peer = PeerUri::from("peer:bob");
        let name = contact_document_name(&base, &peer);
        assert_eq!(parse(&name).unwrap(), ParsedName::Contact { base, peer });
    }

    #[test]
    fn unknown_thread_type_rejected() {
        let name = DocumentName("/threads/b1/bogus/h1".to_string());
        assert!(matches!(parse(&name), Err(NameError::UnknownThreadType(_, _))));
    }

    #[test]
    fn too_short_name_rejected() {
        let name = DocumentName("/threads/b1".to_string());
        assert!(matches!(parse(&name), Err(NameError::TooShort(_))));
    }
}
