//! User, Session and the `Any` envelope that lets one input stream interleave
//! heterogeneous records.

use crate::error::FormatError;
use crate::wire::{write_blob, write_str, Wire, WireReader};

#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct User {
    pub uid: i64,
    /// Opaque profile data (age, location, preferences...).
    pub payload: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct Session {
    pub uid: i64,
    pub url: String,
    /// Opaque session data (timestamps, events...).
    pub payload: Vec<u8>,
}

impl User {
    pub fn new(uid: i64, payload: impl Into<Vec<u8>>) -> Self { Self { uid, payload: payload.into() } }
}

impl Session {
    pub fn new(uid: i64, url: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self { uid, url: url.into(), payload: payload.into() }
    }
}

impl Wire for User {
    fn write_to(&self, out: &mut Vec<u8>) -> Result<(), FormatError> {
        out.extend_from_slice(&self.uid.to_be_bytes());
        write_blob(out, &self.payload)
    }

    fn read_from(reader: &mut WireReader<'_>) -> Result<Self, FormatError> {
        let uid = reader.read_i64()?;
        let payload = reader.read_blob()?;
        Ok(Self { uid, payload })
    }
}

impl Wire for Session {
    fn write_to(&self, out: &mut Vec<u8>) -> Result<(), FormatError> {
        out.extend_from_slice(&self.uid.to_be_bytes());
        write_str(out, &self.url)?;
        write_blob(out, &self.payload)
    }

    fn read_from(reader: &mut WireReader<'_>) -> Result<Self, FormatError> {
        let uid = reader.read_i64()?;
        let url = reader.read_str()?;
        let payload = reader.read_blob()?;
        Ok(Self { uid, url, payload })
    }
}

/// Record kinds an envelope may carry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RecordKind {
    Session,
    User,
    Url,
}

impl RecordKind {
    /// Declared field order on the wire.
    pub const ALL: [RecordKind; 3] = [RecordKind::Session, RecordKind::User, RecordKind::Url];

    pub const fn bit(self) -> u8 {
        match self {
            RecordKind::Session => 0x1,
            RecordKind::User => 0x2,
            RecordKind::Url => 0x4,
        }
    }
}

/// Presence bitmask written ahead of the envelope's fields.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct Presence(u8);

impl Presence {
    const DECLARED: u8 = 0x1 | 0x2 | 0x4;

    pub fn from_bits(bits: u8) -> Result<Self, FormatError> {
        if bits & !Self::DECLARED != 0 {
            return Err(FormatError::UnknownFields(bits));
        }
        Ok(Self(bits))
    }

    pub fn bits(self) -> u8 { self.0 }
    pub fn contains(self, kind: RecordKind) -> bool { self.0 & kind.bit() != 0 }
    pub fn is_empty(self) -> bool { self.0 == 0 }

    fn with(self, kind: RecordKind, present: bool) -> Self {
        if present { Self(self.0 | kind.bit()) } else { self }
    }
}

/// Envelope carrying any subset of {session, user, url}.
///
/// Several fields may be present at once: the enrichment join emits a session
/// paired with its user in a single envelope.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct Any {
    pub session: Option<Session>,
    pub user: Option<User>,
    pub url: Option<String>,
}

impl Any {
    pub fn session(session: Session) -> Self { Self { session: Some(session), ..Self::default() } }
    pub fn user(user: User) -> Self { Self { user: Some(user), ..Self::default() } }
    pub fn url(url: impl Into<String>) -> Self { Self { url: Some(url.into()), ..Self::default() } }

    pub fn enriched(session: Session, user: Option<User>) -> Self {
        Self { session: Some(session), user, url: None }
    }

    pub fn presence(&self) -> Presence {
        Presence::default()
            .with(RecordKind::Session, self.session.is_some())
            .with(RecordKind::User, self.user.is_some())
            .with(RecordKind::Url, self.url.is_some())
    }

    pub fn kinds(&self) -> impl Iterator<Item = RecordKind> + '_ {
        let presence = self.presence();
        RecordKind::ALL.into_iter().filter(move |k| presence.contains(*k))
    }

    pub fn is_empty(&self) -> bool { self.presence().is_empty() }

    /// Decodes into an existing envelope, replacing every field. Fields absent
    /// from the mask end up `None` even if `self` held a value before.
    pub fn decode_into(&mut self, bytes: &[u8]) -> Result<(), FormatError> {
        *self = Any::decode(bytes)?;
        Ok(())
    }
}

impl Wire for Any {
    fn write_to(&self, out: &mut Vec<u8>) -> Result<(), FormatError> {
        out.push(self.presence().bits());
        if let Some(session) = &self.session {
            session.write_to(out)?;
        }
        if let Some(user) = &self.user {
            user.write_to(out)?;
        }
        if let Some(url) = &self.url {
            write_str(out, url)?;
        }
        Ok(())
    }

    fn read_from(reader: &mut WireReader<'_>) -> Result<Self, FormatError> {
        let presence = Presence::from_bits(reader.read_u8()?)?;
        let session = match presence.contains(RecordKind::Session) {
            true => Some(Session::read_from(reader)?),
            false => None,
        };
        let user = match presence.contains(RecordKind::User) {
            true => Some(User::read_from(reader)?),
            false => None,
        };
        let url = match presence.contains(RecordKind::Url) {
            true => Some(reader.read_str()?),
            false => None,
        };
        Ok(Self { session, user, url })
    }
}
