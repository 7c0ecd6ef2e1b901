use crate::error::{DeferError, Result};
use crate::mount::Mount;
use crate::node::{NodeAttrs, NodeKind};
use crate::node::attr::system_time_to_timespec;
use chrono::{DateTime, Local, Utc};
use std::io::Write;
use std::path::Path;
use std::time::SystemTime;

/// Shown for timestamps chrono cannot represent.
const UNKNOWN_TIME: &str = "?";

/// Daemon-reported times are arbitrary, so out-of-range values become
/// `None` instead of reaching chrono's panicking `From<SystemTime>`.
fn to_utc(time: SystemTime) -> Option<DateTime<Utc>> {
    let ts = system_time_to_timespec(time);
    let nsec = u32::try_from(ts.nsec).ok()?;
    DateTime::from_timestamp(ts.sec, nsec)
}

fn format_mtime(attrs: &NodeAttrs) -> String {
    match to_utc(attrs.mtime) {
        Some(utc) => utc
            .with_timezone(&Local)
            .format("%Y-%m-%d %H:%M")
            .to_string(),
        None => UNKNOWN_TIME.to_string(),
    }
}

fn rfc3339(time: SystemTime) -> String {
    to_utc(time).map_or_else(|| UNKNOWN_TIME.to_string(), |utc| utc.to_rfc3339())
}

fn kind_marker(kind: NodeKind) -> char {
    match kind {
        NodeKind::Directory => 'd',
        NodeKind::File => '-',
    }
}

pub fn list_dir(mount: &Mount, path: &str, long: bool, json: bool) -> Result<()> {
    let dir = mount.resolve(path)?;
    let entries = mount.readdir(&dir)?;
    let names: Vec<&str> = entries
        .iter()
        .map(|e| e.name.as_str())
        .filter(|name| *name != "." && *name != "..")
        .collect();

    if !long && !json {
        for name in names {
            println!("{}", name);
        }
        return Ok(());
    }

    let mut rows = Vec::with_capacity(names.len());
    for name in names {
        let node = mount.lookup(&dir, name)?;
        rows.push((name, node.id(), node.attrs()));
    }

    if json {
        let display: Vec<_> = rows
            .iter()
            .map(|(name, id, attrs)| {
                serde_json::json!({
                    "name": name,
                    "id": id,
                    "kind": attrs.kind.to_string(),
                    "mode": format!("{:o}", attrs.permissions()),
                    "size": attrs.size,
                    "mtime": rfc3339(attrs.mtime),
                })
            })
            .collect();
        println!("{}", serde_json::to_string(&display)?);
    } else {
        for (name, _, attrs) in &rows {
            println!(
                "{}{:04o} {:>10} {} {}",
                kind_marker(attrs.kind),
                attrs.permissions(),
                attrs.size,
                format_mtime(attrs),
                name
            );
        }
    }
    Ok(())
}

pub fn stat_path(mount: &Mount, path: &str, json: bool) -> Result<()> {
    let node = mount.resolve(path)?;
    let attrs = mount.getattr(&node)?;

    if json {
        let display = serde_json::json!({
            "path": node.path(),
            "id": node.id(),
            "kind": attrs.kind.to_string(),
            "mode": format!("{:o}", attrs.mode),
            "size": attrs.size,
            "atime": rfc3339(attrs.atime),
            "mtime": rfc3339(attrs.mtime),
            "ctime": rfc3339(attrs.ctime),
        });
        println!("{}", serde_json::to_string_pretty(&display)?);
    } else {
        println!("  Path: {}", node.path());
        println!("    Id: {}", node.id());
        println!("  Type: {}", attrs.kind);
        println!("  Mode: {:o}", attrs.mode);
        println!("  Size: {}", attrs.size);
        println!("Access: {}", rfc3339(attrs.atime));
        println!("Modify: {}", rfc3339(attrs.mtime));
        println!("Change: {}", rfc3339(attrs.ctime));
    }
    Ok(())
}

/// Stream a file to `out`, one channel buffer at a time.
pub fn cat_file(mount: &Mount, path: &str, out: &mut impl Write) -> Result<u64> {
    let node = mount.resolve(path)?;
    let chunk = mount.driver().payload_capacity();
    let mut offset = 0u64;
    loop {
        let data = mount.read(&node, offset, chunk)?;
        if data.is_empty() {
            break;
        }
        out.write_all(&data)?;
        offset += data.len() as u64;
    }
    out.flush()?;
    Ok(offset)
}

/// Copy `local` to `path`, replacing any existing file.
pub fn put_file(mount: &Mount, local: &Path, path: &str) -> Result<u64> {
    let data = std::fs::read(local).map_err(|e| {
        DeferError::Io(format!("Failed to read {}: {}", local.display(), e))
    })?;
    let (parent, name) = mount.resolve_parent(path)?;
    match mount.lookup(&parent, name) {
        Ok(existing) if existing.kind().is_dir() => return Err(DeferError::IsADirectory),
        Ok(existing) => {
            drop(existing);
            mount.remove(&parent, name)?;
        }
        Err(DeferError::NotFound) => {}
        Err(e) => return Err(e),
    }

    let node = mount.create(&parent, name, 0o644)?;
    let mut offset = 0usize;
    while offset < data.len() {
        let written = mount.write(&node, offset as u64, &data[offset..])?;
        if written == 0 {
            return Err(DeferError::Io("daemon accepted no data".to_string()));
        }
        offset += written;
    }
    Ok(offset as u64)
}

pub fn touch_file(mount: &Mount, path: &str) -> Result<()> {
    let (parent, name) = mount.resolve_parent(path)?;
    match mount.lookup(&parent, name) {
        Ok(_) => Ok(()),
        Err(DeferError::NotFound) => mount.create(&parent, name, 0o644).map(|_| ()),
        Err(e) => Err(e),
    }
}

pub fn make_dir(mount: &Mount, path: &str) -> Result<()> {
    let (parent, name) = mount.resolve_parent(path)?;
    mount.mkdir(&parent, name, 0o755).map(|_| ())
}

pub fn remove_file(mount: &Mount, path: &str) -> Result<()> {
    let (parent, name) = mount.resolve_parent(path)?;
    mount.remove(&parent, name)
}

pub fn remove_dir(mount: &Mount, path: &str) -> Result<()> {
    let (parent, name) = mount.resolve_parent(path)?;
    mount.rmdir(&parent, name)
}

pub fn rename(mount: &Mount, from: &str, to: &str) -> Result<()> {
    let (from_dir, from_name) = mount.resolve_parent(from)?;
    let (to_dir, to_name) = mount.resolve_parent(to)?;
    mount.rename(&from_dir, from_name, &to_dir, to_name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::attr::timespec_to_system_time;
    use crate::wire::Timespec;
    use std::time::UNIX_EPOCH;

    #[test]
    fn test_rfc3339_formats_ordinary_times() {
        assert_eq!(rfc3339(UNIX_EPOCH), "1970-01-01T00:00:00+00:00");
    }

    #[test]
    fn test_unrepresentable_times_use_placeholder() {
        let far = timespec_to_system_time(Timespec {
            sec: i64::MAX / 2,
            nsec: 0,
        });
        assert_eq!(rfc3339(far), UNKNOWN_TIME);

        let mut attrs = NodeAttrs::new(NodeKind::File, 0o644);
        attrs.mtime = far;
        assert_eq!(format_mtime(&attrs), UNKNOWN_TIME);
    }
}
