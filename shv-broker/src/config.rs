//! Broker configuration, loaded from a CPON document: the wire format is
//! the config format, so this reads `Item`s straight off `shv_chainpack`'s
//! generic facade rather than pulling in a serde-based config crate.

use std::collections::HashMap;
use std::io::{self, Cursor};

use shv_chainpack::Unpacker;
use shv_value::{AccessLevel, Item};

use crate::role::{AccessGrant, Role};

#[derive(Debug, Clone, Default)]
pub struct UserAuth {
    pub password: Option<String>,
    pub sha1pass: Option<String>,
    pub role: String,
}

#[derive(Debug, Clone, Default)]
pub struct AutoSetup {
    pub device_id: String,
    pub role: String,
    pub mount_point: Option<String>,
    pub subscriptions: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct BrokerConfig {
    pub name: Option<String>,
    pub listen: Vec<String>,
    pub users: HashMap<String, UserAuth>,
    pub roles: HashMap<String, Role>,
    pub autosetups: Vec<AutoSetup>,
}

type CponUnpacker = Unpacker<Cursor<Vec<u8>>>;

fn invalid(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.into())
}

/// Skips `value`, which was just returned by `unpack()` (so any container
/// it opens is still unconsumed; `1` accounts for that already-open
/// container whose matching `ContainerEnd` is still owed).
fn skip_value(u: &mut CponUnpacker, value: &Item) -> io::Result<()> {
    if value.is_container_open() {
        u.skip(1)
    } else {
        Ok(())
    }
}

/// Reads a value that is either a single string or a list of strings.
fn read_string_list(u: &mut CponUnpacker, item: Item) -> io::Result<Vec<String>> {
    match item {
        Item::String(_) => Ok(vec![u.strdup(item, None)?]),
        Item::List => {
            let mut out = Vec::new();
            loop {
                let v = u.unpack()?;
                if matches!(v, Item::ContainerEnd) {
                    return Ok(out);
                }
                match v {
                    Item::String(_) => out.push(u.strdup(v, None)?),
                    other => return Err(invalid(format!("expected string in list, got {other:?}"))),
                }
            }
        }
        other => Err(invalid(format!("expected string or list of strings, got {other:?}"))),
    }
}

/// Reads `{access: {level: RI|[RI,...], ...}, mountPoints: ..., subscriptions: ...}`.
fn read_role(u: &mut CponUnpacker) -> io::Result<Role> {
    let mut role = Role::default();
    loop {
        let key_item = u.unpack()?;
        if matches!(key_item, Item::ContainerEnd) {
            return Ok(role);
        }
        let key = u.strdup(key_item, None)?;
        let value = u.unpack()?;
        match key.as_str() {
            "access" => {
                if !matches!(value, Item::Map) {
                    return Err(invalid("roles.*.access must be a map"));
                }
                loop {
                    let level_key = u.unpack()?;
                    if matches!(level_key, Item::ContainerEnd) {
                        break;
                    }
                    let level_name = u.strdup(level_key, None)?;
                    let level = level_name.parse::<AccessLevel>().map_err(|_| invalid(format!("unknown access level {level_name:?}")))?;
                    let ri_value = u.unpack()?;
                    let patterns = read_string_list(u, ri_value)?;
                    role.access.push(AccessGrant { level, patterns });
                }
            }
            "mountPoints" => role.mount_points = read_string_list(u, value)?,
            "subscriptions" => role.initial_subscriptions = read_string_list(u, value)?,
            _ => skip_value(u, &value)?,
        }
    }
}

fn read_user(u: &mut CponUnpacker) -> io::Result<UserAuth> {
    let mut auth = UserAuth::default();
    loop {
        let key_item = u.unpack()?;
        if matches!(key_item, Item::ContainerEnd) {
            return Ok(auth);
        }
        let key = u.strdup(key_item, None)?;
        let value = u.unpack()?;
        match key.as_str() {
            "password" => auth.password = Some(u.strdup(value, None)?),
            "sha1pass" => auth.sha1pass = Some(u.strdup(value, None)?),
            "role" => auth.role = u.strdup(value, None)?,
            _ => skip_value(u, &value)?,
        }
    }
}

fn read_autosetup(u: &mut CponUnpacker) -> io::Result<AutoSetup> {
    let mut setup = AutoSetup::default();
    loop {
        let key_item = u.unpack()?;
        if matches!(key_item, Item::ContainerEnd) {
            return Ok(setup);
        }
        let key = u.strdup(key_item, None)?;
        let value = u.unpack()?;
        match key.as_str() {
            "deviceId" => setup.device_id = u.strdup(value, None)?,
            "role" => setup.role = u.strdup(value, None)?,
            "mountPoint" => setup.mount_point = Some(u.strdup(value, None)?),
            "subscriptions" => setup.subscriptions = read_string_list(u, value)?,
            _ => skip_value(u, &value)?,
        }
    }
}

impl BrokerConfig {
    /// Parses a CPON document into a `BrokerConfig`.
    pub fn from_cpon(buf: Vec<u8>) -> io::Result<Self> {
        let mut u = Unpacker::cpon(buf);
        if !matches!(u.unpack()?, Item::Map) {
            return Err(invalid("broker config must be a top-level map"));
        }
        let mut config = BrokerConfig::default();
        loop {
            let key_item = u.unpack()?;
            if matches!(key_item, Item::ContainerEnd) {
                return Ok(config);
            }
            let key = u.strdup(key_item, None)?;
            let value = u.unpack()?;
            match key.as_str() {
                "name" => config.name = Some(u.strdup(value, None)?),
                "listen" => config.listen = read_string_list(&mut u, value)?,
                "users" => {
                    if !matches!(value, Item::Map) {
                        return Err(invalid("users must be a map"));
                    }
                    loop {
                        let name_item = u.unpack()?;
                        if matches!(name_item, Item::ContainerEnd) {
                            break;
                        }
                        let name = u.strdup(name_item, None)?;
                        if !matches!(u.unpack()?, Item::Map) {
                            return Err(invalid("users.* must be a map"));
                        }
                        let auth = read_user(&mut u)?;
                        config.users.insert(name, auth);
                    }
                }
                "roles" => {
                    if !matches!(value, Item::Map) {
                        return Err(invalid("roles must be a map"));
                    }
                    loop {
                        let name_item = u.unpack()?;
                        if matches!(name_item, Item::ContainerEnd) {
                            break;
                        }
                        let name = u.strdup(name_item, None)?;
                        if !matches!(u.unpack()?, Item::Map) {
                            return Err(invalid("roles.* must be a map"));
                        }
                        let mut role = read_role(&mut u)?;
                        role.name = name.clone();
                        config.roles.insert(name, role);
                    }
                }
                "autosetups" => {
                    if !matches!(value, Item::List) {
                        return Err(invalid("autosetups must be a list"));
                    }
                    loop {
                        let entry = u.unpack()?;
                        if matches!(entry, Item::ContainerEnd) {
                            break;
                        }
                        if !matches!(entry, Item::Map) {
                            return Err(invalid("autosetups entries must be maps"));
                        }
                        config.autosetups.push(read_autosetup(&mut u)?);
                    }
                }
                _ => skip_value(&mut u, &value)?,
            }
        }
    }
}
