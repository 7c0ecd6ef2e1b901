//! Daemon side: answer requests arriving on a bound channel.

pub mod local;

pub use local::LocalBackend;

use crate::channel::Device;
use crate::error::{io_error_to_errno, DeferError, Result};
use crate::interrupt::Interrupt;
use crate::wire::{
    encode_listing, AttrPayload, Request, RequestHeader, RequestKind, Response, MOREDATA,
    RESPONSE_HEADER_SIZE,
};
use std::io;
use tracing::{debug, info, warn};

/// Storage a daemon serves requests from.
pub trait Backend: Send + Sync {
    fn read(&self, request: &Request) -> io::Result<Vec<u8>>;
    fn readdir(&self, request: &Request) -> io::Result<Vec<String>>;
    fn getattr(&self, request: &Request) -> io::Result<AttrPayload>;
    fn write(&self, request: &Request, data: &[u8]) -> io::Result<()>;
    fn create(&self, request: &Request, attr: &AttrPayload) -> io::Result<AttrPayload>;
    fn remove(&self, request: &Request) -> io::Result<()>;
    fn mkdir(&self, request: &Request, attr: &AttrPayload) -> io::Result<AttrPayload>;
    fn rmdir(&self, request: &Request) -> io::Result<()>;
}

/// Answer one raw request. `capacity` bounds the encoded response.
pub fn dispatch(raw: &[u8], backend: &dyn Backend, capacity: usize) -> Response {
    let header = match RequestHeader::from_bytes(raw) {
        Ok(header) => header,
        Err(e) => {
            warn!(error = %e, "unparseable request");
            return Response::error(0, i64::from(libc::EINVAL));
        }
    };
    let raw_kind = header.kind;
    let request = match Request::decode(raw) {
        Ok(request) => request,
        Err(DeferError::Unsupported(_)) => {
            debug!(kind = raw_kind, "unknown request kind");
            return Response::error(raw_kind, i64::from(libc::ENOSYS));
        }
        Err(e) => return Response::error(raw_kind, e.errno()),
    };
    let room = capacity.saturating_sub(RESPONSE_HEADER_SIZE);

    let outcome = match request.kind {
        RequestKind::Read => backend.read(&request).map(|mut data| {
            data.truncate(room.min(request.size as usize));
            data
        }),
        RequestKind::ReadDir => match backend.readdir(&request) {
            Ok(names) => match encode_listing(&names, room) {
                Ok(payload) => Ok(payload),
                Err(_) => {
                    warn!(path = %request.path, entries = names.len(), "listing does not fit");
                    return Response::error(raw_kind, MOREDATA);
                }
            },
            Err(e) => Err(e),
        },
        RequestKind::GetAttr => backend.getattr(&request).map(|a| a.to_bytes().to_vec()),
        RequestKind::Write => {
            let len = (request.size as usize).min(request.payload.len());
            backend
                .write(&request, &request.payload[..len])
                .map(|()| Vec::new())
        }
        RequestKind::Create | RequestKind::Mkdir => match AttrPayload::from_bytes(&request.payload)
        {
            Ok(attr) => {
                let made = if request.kind == RequestKind::Create {
                    backend.create(&request, &attr)
                } else {
                    backend.mkdir(&request, &attr)
                };
                made.map(|a| a.to_bytes().to_vec())
            }
            Err(_) => Err(io::Error::from_raw_os_error(libc::EINVAL)),
        },
        RequestKind::Remove => backend.remove(&request).map(|()| Vec::new()),
        RequestKind::Rmdir => backend.rmdir(&request).map(|()| Vec::new()),
    };

    match outcome {
        Ok(payload) => Response::ok(raw_kind, payload),
        Err(e) => {
            debug!(kind = %request.kind, path = %request.path, error = %e, "request failed");
            Response::error(raw_kind, io_error_to_errno(&e))
        }
    }
}

/// Serve `device` until `intr` is raised.
pub fn serve(device: &Device, backend: &dyn Backend, intr: &Interrupt) -> Result<()> {
    let mut inbound = vec![0u8; device.capacity()];
    let mut outbound = vec![0u8; device.capacity()];
    info!(channel = device.index(), "daemon serving");
    loop {
        let n = match device.read(&mut inbound, intr) {
            Ok(n) => n,
            Err(DeferError::Interrupted) => {
                info!(channel = device.index(), "daemon stopping");
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        let response = dispatch(&inbound[..n], backend, device.capacity());
        let len = response.encode_into(&mut outbound)?;
        match device.write(&outbound[..len]) {
            Ok(_) | Err(DeferError::StaleResponse) => {}
            Err(e) => return Err(e),
        }
    }
}
