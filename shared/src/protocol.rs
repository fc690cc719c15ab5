//! Typed packets and their fixed wire schemas.
//!
//! A frame body always begins with a `u16` little-endian packet id followed
//! by the fields for that id. Strings use the LEB128-prefixed UTF-8 encoding
//! from [`crate::wire`]. Decoders are total and never panic on hostile input.
//!
//! | Id   | Packet            | Body                                              |
//! |------|-------------------|---------------------------------------------------|
//! | 1000 | LoginRequest      | string username, string password                  |
//! | 1001 | LoginResponse     | bool success, string message, string token        |
//! | 1004 | ReconnectRequest  | string token, string username                     |
//! | 1005 | ReconnectResponse | bool success, string message, string sessionId    |
//! | 2003 | MoveRequest       | f32 x, f32 y, f32 z                               |
//! | 3000 | ObjectSpawn       | u32 id, u8 kind, f32 x/y/z, i32 hp/maxHp/level    |
//! | 3001 | ObjectDespawn     | u32 id                                            |
//! | 3002 | ObjectUpdate      | u32 id, u8 flags, conditional fields              |
//! | 3003 | ObjectSnapshot    | i32 count, repeated spawn-shaped entries          |
//! | 9000 | Heartbeat         | empty                                             |
//! | 9999 | Error             | string message                                    |

use crate::wire::{ByteReader, ByteWriter, WireError};

pub const LOGIN_REQUEST: u16 = 1000;
pub const LOGIN_RESPONSE: u16 = 1001;
pub const RECONNECT_REQUEST: u16 = 1004;
pub const RECONNECT_RESPONSE: u16 = 1005;
pub const MOVE_REQUEST: u16 = 2003;
pub const OBJECT_SPAWN: u16 = 3000;
pub const OBJECT_DESPAWN: u16 = 3001;
pub const OBJECT_UPDATE: u16 = 3002;
pub const OBJECT_SNAPSHOT: u16 = 3003;
pub const HEARTBEAT: u16 = 9000;
pub const ERROR: u16 = 9999;

/// ObjectUpdate flag bit: position fields present.
pub const UPDATE_POSITION: u8 = 0x01;
/// ObjectUpdate flag bit: HP field present.
pub const UPDATE_HP: u8 = 0x02;
/// ObjectUpdate flag bit: level field present.
pub const UPDATE_LEVEL: u8 = 0x04;

/// Entity type tag carried in spawn and snapshot packets.
///
/// Id spaces are partitioned by range (characters from 1, monsters from
/// 10 000) so the kind is also inferrable from an id alone when the full
/// record is absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ObjectKind {
    Character = 0,
    Monster = 1,
    Npc = 2,
    Item = 3,
    Projectile = 4,
    Effect = 5,
}

impl ObjectKind {
    pub fn from_u8(value: u8) -> Result<Self, WireError> {
        match value {
            0 => Ok(ObjectKind::Character),
            1 => Ok(ObjectKind::Monster),
            2 => Ok(ObjectKind::Npc),
            3 => Ok(ObjectKind::Item),
            4 => Ok(ObjectKind::Projectile),
            5 => Ok(ObjectKind::Effect),
            value => Err(WireError::InvalidTag {
                field: "object kind",
                value,
            }),
        }
    }
}

/// One entity record inside an [`Packet::ObjectSnapshot`].
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotEntry {
    pub id: u32,
    pub kind: ObjectKind,
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub hp: i32,
    pub max_hp: i32,
    pub level: i32,
}

/// Every packet that can cross the wire, in either direction.
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    // === Client → Server ===
    /// First packet of a fresh session; answered by `LoginResponse`.
    LoginRequest { username: String, password: String },
    /// Re-attach to a character left behind by a dropped connection.
    ReconnectRequest { token: String, username: String },
    /// Sets the avatar's movement destination; integration happens in the
    /// server tick, the client is trusted for the target only.
    MoveRequest { x: f32, y: f32, z: f32 },
    /// Keepalive; refreshes the session's activity timestamp and is
    /// otherwise dropped.
    Heartbeat,

    // === Server → Client ===
    /// Outcome of a login attempt. `token` is empty on failure.
    LoginResponse {
        success: bool,
        message: String,
        token: String,
    },
    /// Outcome of a reconnect attempt. `session_id` is empty on failure.
    ReconnectResponse {
        success: bool,
        message: String,
        session_id: String,
    },
    /// An entity entered the receiver's view.
    ObjectSpawn {
        id: u32,
        kind: ObjectKind,
        x: f32,
        y: f32,
        z: f32,
        hp: i32,
        max_hp: i32,
        level: i32,
    },
    /// An entity left the receiver's view or was destroyed.
    ObjectDespawn { id: u32 },
    /// Field-level delta for an entity already known to the receiver.
    /// Absent options correspond to cleared flag bits on the wire.
    ObjectUpdate {
        id: u32,
        position: Option<(f32, f32, f32)>,
        hp: Option<i32>,
        level: Option<i32>,
    },
    /// Full view contents, sent once when a view is (re)established.
    ObjectSnapshot { entries: Vec<SnapshotEntry> },
    /// Free-form error report.
    Error { message: String },
}

impl Packet {
    /// The numeric id written at the start of this packet's body.
    pub fn id(&self) -> u16 {
        match self {
            Packet::LoginRequest { .. } => LOGIN_REQUEST,
            Packet::LoginResponse { .. } => LOGIN_RESPONSE,
            Packet::ReconnectRequest { .. } => RECONNECT_REQUEST,
            Packet::ReconnectResponse { .. } => RECONNECT_RESPONSE,
            Packet::MoveRequest { .. } => MOVE_REQUEST,
            Packet::ObjectSpawn { .. } => OBJECT_SPAWN,
            Packet::ObjectDespawn { .. } => OBJECT_DESPAWN,
            Packet::ObjectUpdate { .. } => OBJECT_UPDATE,
            Packet::ObjectSnapshot { .. } => OBJECT_SNAPSHOT,
            Packet::Heartbeat => HEARTBEAT,
            Packet::Error { .. } => ERROR,
        }
    }

    /// Dispatch priority class; higher runs earlier.
    pub fn priority(&self) -> i32 {
        match self {
            Packet::MoveRequest { .. } | Packet::ObjectUpdate { .. } => 100,
            Packet::ObjectSpawn { .. }
            | Packet::ObjectDespawn { .. }
            | Packet::LoginRequest { .. }
            | Packet::LoginResponse { .. }
            | Packet::ReconnectRequest { .. }
            | Packet::ReconnectResponse { .. } => 50,
            Packet::ObjectSnapshot { .. } | Packet::Error { .. } => 0,
            Packet::Heartbeat => -50,
        }
    }

    /// Serializes the packet into a frame body (id included, length prefix
    /// excluded).
    pub fn encode(&self) -> Vec<u8> {
        let mut w = ByteWriter::new();
        w.put_u16(self.id());
        match self {
            Packet::LoginRequest { username, password } => {
                w.put_string(username);
                w.put_string(password);
            }
            Packet::LoginResponse {
                success,
                message,
                token,
            } => {
                w.put_bool(*success);
                w.put_string(message);
                w.put_string(token);
            }
            Packet::ReconnectRequest { token, username } => {
                w.put_string(token);
                w.put_string(username);
            }
            Packet::ReconnectResponse {
                success,
                message,
                session_id,
            } => {
                w.put_bool(*success);
                w.put_string(message);
                w.put_string(session_id);
            }
            Packet::MoveRequest { x, y, z } => {
                w.put_f32(*x);
                w.put_f32(*y);
                w.put_f32(*z);
            }
            Packet::ObjectSpawn {
                id,
                kind,
                x,
                y,
                z,
                hp,
                max_hp,
                level,
            } => {
                w.put_u32(*id);
                w.put_u8(*kind as u8);
                w.put_f32(*x);
                w.put_f32(*y);
                w.put_f32(*z);
                w.put_i32(*hp);
                w.put_i32(*max_hp);
                w.put_i32(*level);
            }
            Packet::ObjectDespawn { id } => {
                w.put_u32(*id);
            }
            Packet::ObjectUpdate {
                id,
                position,
                hp,
                level,
            } => {
                let mut flags = 0u8;
                if position.is_some() {
                    flags |= UPDATE_POSITION;
                }
                if hp.is_some() {
                    flags |= UPDATE_HP;
                }
                if level.is_some() {
                    flags |= UPDATE_LEVEL;
                }
                w.put_u32(*id);
                w.put_u8(flags);
                if let Some((x, y, z)) = position {
                    w.put_f32(*x);
                    w.put_f32(*y);
                    w.put_f32(*z);
                }
                if let Some(hp) = hp {
                    w.put_i32(*hp);
                }
                if let Some(level) = level {
                    w.put_i32(*level);
                }
            }
            Packet::ObjectSnapshot { entries } => {
                w.put_i32(entries.len() as i32);
                for e in entries {
                    w.put_u32(e.id);
                    w.put_u8(e.kind as u8);
                    w.put_f32(e.x);
                    w.put_f32(e.y);
                    w.put_f32(e.z);
                    w.put_i32(e.hp);
                    w.put_i32(e.max_hp);
                    w.put_i32(e.level);
                }
            }
            Packet::Heartbeat => {}
            Packet::Error { message } => {
                w.put_string(message);
            }
        }
        w.into_bytes()
    }

    /// Parses a frame body back into a typed packet.
    pub fn decode(body: &[u8]) -> Result<Packet, WireError> {
        let mut r = ByteReader::new(body);
        let id = r.get_u16()?;
        match id {
            LOGIN_REQUEST => Ok(Packet::LoginRequest {
                username: r.get_string()?,
                password: r.get_string()?,
            }),
            LOGIN_RESPONSE => Ok(Packet::LoginResponse {
                success: r.get_bool()?,
                message: r.get_string()?,
                token: r.get_string()?,
            }),
            RECONNECT_REQUEST => Ok(Packet::ReconnectRequest {
                token: r.get_string()?,
                username: r.get_string()?,
            }),
            RECONNECT_RESPONSE => Ok(Packet::ReconnectResponse {
                success: r.get_bool()?,
                message: r.get_string()?,
                session_id: r.get_string()?,
            }),
            MOVE_REQUEST => Ok(Packet::MoveRequest {
                x: r.get_f32()?,
                y: r.get_f32()?,
                z: r.get_f32()?,
            }),
            OBJECT_SPAWN => Ok(Packet::ObjectSpawn {
                id: r.get_u32()?,
                kind: ObjectKind::from_u8(r.get_u8()?)?,
                x: r.get_f32()?,
                y: r.get_f32()?,
                z: r.get_f32()?,
                hp: r.get_i32()?,
                max_hp: r.get_i32()?,
                level: r.get_i32()?,
            }),
            OBJECT_DESPAWN => Ok(Packet::ObjectDespawn { id: r.get_u32()? }),
            OBJECT_UPDATE => {
                let id = r.get_u32()?;
                let flags = r.get_u8()?;
                let position = if flags & UPDATE_POSITION != 0 {
                    Some((r.get_f32()?, r.get_f32()?, r.get_f32()?))
                } else {
                    None
                };
                let hp = if flags & UPDATE_HP != 0 {
                    Some(r.get_i32()?)
                } else {
                    None
                };
                let level = if flags & UPDATE_LEVEL != 0 {
                    Some(r.get_i32()?)
                } else {
                    None
                };
                Ok(Packet::ObjectUpdate {
                    id,
                    position,
                    hp,
                    level,
                })
            }
            OBJECT_SNAPSHOT => {
                let count = r.get_i32()?;
                if count < 0 {
                    return Err(WireError::InvalidTag {
                        field: "snapshot count",
                        value: 0,
                    });
                }
                let mut entries = Vec::new();
                for _ in 0..count {
                    entries.push(SnapshotEntry {
                        id: r.get_u32()?,
                        kind: ObjectKind::from_u8(r.get_u8()?)?,
                        x: r.get_f32()?,
                        y: r.get_f32()?,
                        z: r.get_f32()?,
                        hp: r.get_i32()?,
                        max_hp: r.get_i32()?,
                        level: r.get_i32()?,
                    });
                }
                Ok(Packet::ObjectSnapshot { entries })
            }
            HEARTBEAT => Ok(Packet::Heartbeat),
            ERROR => Ok(Packet::Error {
                message: r.get_string()?,
            }),
            id => Err(WireError::UnknownPacketId { id }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(packet: Packet) {
        let body = packet.encode();
        let decoded = Packet::decode(&body).unwrap();
        assert_eq!(decoded, packet);
        // Re-encoding must reproduce the exact bytes.
        assert_eq!(decoded.encode(), body);
    }

    #[test]
    fn test_login_roundtrip() {
        roundtrip(Packet::LoginRequest {
            username: "alice".into(),
            password: "hunter2".into(),
        });
        roundtrip(Packet::LoginResponse {
            success: true,
            message: "welcome".into(),
            token: "tok-1234".into(),
        });
        roundtrip(Packet::LoginResponse {
            success: false,
            message: "bad credentials".into(),
            token: "".into(),
        });
    }

    #[test]
    fn test_reconnect_roundtrip() {
        roundtrip(Packet::ReconnectRequest {
            token: "tok".into(),
            username: "bob".into(),
        });
        roundtrip(Packet::ReconnectResponse {
            success: true,
            message: "".into(),
            session_id: "sid-9".into(),
        });
    }

    #[test]
    fn test_move_request_roundtrip() {
        roundtrip(Packet::MoveRequest {
            x: 10.0,
            y: 0.0,
            z: -3.25,
        });
    }

    #[test]
    fn test_spawn_despawn_roundtrip() {
        roundtrip(Packet::ObjectSpawn {
            id: 10_001,
            kind: ObjectKind::Monster,
            x: 5.0,
            y: 0.0,
            z: 5.0,
            hp: 80,
            max_hp: 100,
            level: 3,
        });
        roundtrip(Packet::ObjectDespawn { id: 42 });
    }

    #[test]
    fn test_update_flag_combinations() {
        roundtrip(Packet::ObjectUpdate {
            id: 7,
            position: Some((1.0, 2.0, 3.0)),
            hp: None,
            level: None,
        });
        roundtrip(Packet::ObjectUpdate {
            id: 7,
            position: None,
            hp: Some(55),
            level: Some(4),
        });
        roundtrip(Packet::ObjectUpdate {
            id: 7,
            position: Some((0.5, 0.0, -0.5)),
            hp: Some(1),
            level: Some(99),
        });
    }

    #[test]
    fn test_update_flags_on_wire() {
        let body = Packet::ObjectUpdate {
            id: 1,
            position: Some((0.0, 0.0, 0.0)),
            hp: Some(10),
            level: None,
        }
        .encode();
        // id(2) + object id(4), then flags.
        assert_eq!(body[6], UPDATE_POSITION | UPDATE_HP);
    }

    #[test]
    fn test_snapshot_roundtrip() {
        roundtrip(Packet::ObjectSnapshot { entries: vec![] });
        roundtrip(Packet::ObjectSnapshot {
            entries: vec![
                SnapshotEntry {
                    id: 1,
                    kind: ObjectKind::Character,
                    x: 0.0,
                    y: 0.0,
                    z: 0.0,
                    hp: 100,
                    max_hp: 100,
                    level: 1,
                },
                SnapshotEntry {
                    id: 10_000,
                    kind: ObjectKind::Monster,
                    x: 30.0,
                    y: 0.0,
                    z: 30.0,
                    hp: 100,
                    max_hp: 100,
                    level: 1,
                },
            ],
        });
    }

    #[test]
    fn test_heartbeat_is_bare_id() {
        let body = Packet::Heartbeat.encode();
        assert_eq!(body, HEARTBEAT.to_le_bytes().to_vec());
        roundtrip(Packet::Heartbeat);
    }

    #[test]
    fn test_error_roundtrip() {
        roundtrip(Packet::Error {
            message: "something broke".into(),
        });
    }

    #[test]
    fn test_unknown_id_rejected() {
        let mut w = ByteWriter::new();
        w.put_u16(4242);
        let err = Packet::decode(&w.into_bytes()).unwrap_err();
        assert!(matches!(err, WireError::UnknownPacketId { id: 4242 }));
    }

    #[test]
    fn test_truncated_body_rejected() {
        let body = Packet::MoveRequest {
            x: 1.0,
            y: 2.0,
            z: 3.0,
        }
        .encode();
        for cut in 0..body.len() {
            assert!(
                Packet::decode(&body[..cut]).is_err(),
                "truncation at {} should fail",
                cut
            );
        }
    }

    #[test]
    fn test_bad_kind_tag_rejected() {
        let mut body = Packet::ObjectSpawn {
            id: 1,
            kind: ObjectKind::Character,
            x: 0.0,
            y: 0.0,
            z: 0.0,
            hp: 1,
            max_hp: 1,
            level: 1,
        }
        .encode();
        body[6] = 200; // kind byte follows id(2) + object id(4)
        assert!(matches!(
            Packet::decode(&body),
            Err(WireError::InvalidTag { .. })
        ));
    }

    #[test]
    fn test_priorities() {
        assert_eq!(
            Packet::MoveRequest {
                x: 0.0,
                y: 0.0,
                z: 0.0
            }
            .priority(),
            100
        );
        assert_eq!(Packet::ObjectDespawn { id: 1 }.priority(), 50);
        assert_eq!(
            Packet::ObjectSnapshot { entries: vec![] }.priority(),
            0
        );
        assert_eq!(Packet::Heartbeat.priority(), -50);
    }
}
