use super::Backend;
use crate::wire::{AttrPayload, Request, Timespec, VDIR, VREG};
use std::fs::{self, File, OpenOptions, Permissions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::os::unix::fs::{MetadataExt, OpenOptionsExt, PermissionsExt};
use std::path::{Component, Path, PathBuf};

/// Serves requests from a directory on the local filesystem.
///
/// A request for `path` under mount base path `base` maps to
/// `root/base/path`.
#[derive(Debug, Clone)]
pub struct LocalBackend {
    root: PathBuf,
}

impl LocalBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, request: &Request) -> io::Result<PathBuf> {
        let mut resolved = self.root.clone();
        for part in [request.mount.base_path.as_str(), request.path.as_str()] {
            for component in Path::new(part).components() {
                match component {
                    Component::Normal(name) => resolved.push(name),
                    Component::RootDir | Component::CurDir => {}
                    Component::ParentDir | Component::Prefix(_) => {
                        return Err(io::Error::from_raw_os_error(libc::EACCES));
                    }
                }
            }
        }
        Ok(resolved)
    }
}

pub fn metadata_to_attr(meta: &fs::Metadata) -> AttrPayload {
    AttrPayload {
        mode: u64::from(meta.mode()),
        size: meta.size(),
        vtype: if meta.is_dir() { VDIR } else { VREG },
        mtime: Timespec {
            sec: meta.mtime(),
            nsec: meta.mtime_nsec(),
        },
        atime: Timespec {
            sec: meta.atime(),
            nsec: meta.atime_nsec(),
        },
        ctime: Timespec {
            sec: meta.ctime(),
            nsec: meta.ctime_nsec(),
        },
    }
}

fn permission_bits(attr: &AttrPayload) -> u32 {
    (attr.mode & 0o7777) as u32
}

impl Backend for LocalBackend {
    fn read(&self, request: &Request) -> io::Result<Vec<u8>> {
        let mut file = File::open(self.resolve(request)?)?;
        file.seek(SeekFrom::Start(request.offset))?;
        let mut data = Vec::new();
        file.take(request.size).read_to_end(&mut data)?;
        Ok(data)
    }

    fn readdir(&self, request: &Request) -> io::Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(self.resolve(request)?)? {
            let entry = entry?;
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names)
    }

    fn getattr(&self, request: &Request) -> io::Result<AttrPayload> {
        let meta = fs::metadata(self.resolve(request)?)?;
        Ok(metadata_to_attr(&meta))
    }

    fn write(&self, request: &Request, data: &[u8]) -> io::Result<()> {
        let mut file = OpenOptions::new().write(true).open(self.resolve(request)?)?;
        file.seek(SeekFrom::Start(request.offset))?;
        file.write_all(data)
    }

    fn create(&self, request: &Request, attr: &AttrPayload) -> io::Result<AttrPayload> {
        let path = self.resolve(request)?;
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(permission_bits(attr))
            .open(&path)?;
        Ok(metadata_to_attr(&file.metadata()?))
    }

    fn remove(&self, request: &Request) -> io::Result<()> {
        fs::remove_file(self.resolve(request)?)
    }

    fn mkdir(&self, request: &Request, attr: &AttrPayload) -> io::Result<AttrPayload> {
        let path = self.resolve(request)?;
        fs::create_dir(&path)?;
        fs::set_permissions(&path, Permissions::from_mode(permission_bits(attr)))?;
        Ok(metadata_to_attr(&fs::metadata(&path)?))
    }

    fn rmdir(&self, request: &Request) -> io::Result<()> {
        fs::remove_dir(self.resolve(request)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{MountOpts, RequestKind};
    use tempfile::TempDir;

    fn request(kind: RequestKind, path: &str) -> Request {
        Request::new(kind, path, &MountOpts::new("/", "local", "", "").unwrap())
    }

    #[test]
    fn test_parent_components_are_refused() {
        let dir = TempDir::new().unwrap();
        let backend = LocalBackend::new(dir.path());
        let err = backend
            .getattr(&request(RequestKind::GetAttr, "/../etc"))
            .unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::EACCES));
    }

    #[test]
    fn test_base_path_is_prefixed() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("export")).unwrap();
        fs::write(dir.path().join("export/f"), b"data").unwrap();
        let backend = LocalBackend::new(dir.path());

        let mut req = request(RequestKind::Read, "/f").with_range(1, 2);
        req.mount.base_path = "/export".to_string();
        assert_eq!(backend.read(&req).unwrap(), b"at");
    }

    #[test]
    fn test_readdir_is_sorted() {
        let dir = TempDir::new().unwrap();
        for name in ["b", "a", "c"] {
            fs::write(dir.path().join(name), b"").unwrap();
        }
        let backend = LocalBackend::new(dir.path());
        let names = backend.readdir(&request(RequestKind::ReadDir, "/")).unwrap();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_create_reports_attributes() {
        let dir = TempDir::new().unwrap();
        let backend = LocalBackend::new(dir.path());
        let attr = AttrPayload {
            mode: 0o100640,
            vtype: VREG,
            ..Default::default()
        };
        let made = backend
            .create(&request(RequestKind::Create, "/new"), &attr)
            .unwrap();
        assert_eq!(made.vtype, VREG);
        assert_eq!(made.size, 0);
        assert!(backend
            .create(&request(RequestKind::Create, "/new"), &attr)
            .is_err());
    }
}
