//! # Watch Module
//! Kernel filesystem notifications for the single sentinel path.
//!
//! On Linux the sentinel is watched through a raw, non-blocking inotify
//! instance whose read buffer is decoded here. Other platforms fall back to
//! the `notify` crate. Both sit behind [`EventSource`], so the alert policy and
//! the notifier never see which one is in use.

use crate::error::{DecodeError, SubscriptionError};
use notify::event::{AccessKind, ModifyKind};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::fmt;
use std::path::Path;
use std::sync::mpsc::{self, Receiver, TryRecvError};

/// Event class bits, using the inotify values on every platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct EventMask(u32);

impl EventMask {
    pub const MODIFY: EventMask = EventMask(0x0000_0002);
    pub const ATTRIB: EventMask = EventMask(0x0000_0004);
    pub const OPEN: EventMask = EventMask(0x0000_0020);
    pub const DELETE_SELF: EventMask = EventMask(0x0000_0400);
    pub const MOVE_SELF: EventMask = EventMask(0x0000_0800);
    pub const IGNORED: EventMask = EventMask(0x0000_8000);

    /// Named classes in display order.
    pub const NAMED: [(EventMask, &'static str); 5] = [
        (EventMask::OPEN, "OPEN"),
        (EventMask::MODIFY, "MODIFY"),
        (EventMask::ATTRIB, "ATTRIB"),
        (EventMask::DELETE_SELF, "DELETE_SELF"),
        (EventMask::MOVE_SELF, "MOVE_SELF"),
    ];

    pub const fn from_bits(bits: u32) -> Self {
        EventMask(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: EventMask) -> bool {
        self.0 & other.0 == other.0 && other.0 != 0
    }

    pub const fn union(self, other: EventMask) -> Self {
        EventMask(self.0 | other.0)
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl std::ops::BitOr for EventMask {
    type Output = EventMask;

    fn bitor(self, rhs: EventMask) -> EventMask {
        self.union(rhs)
    }
}

impl fmt::Display for EventMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = EventMask::NAMED
            .iter()
            .filter(|(bit, _)| self.contains(*bit))
            .map(|(_, name)| *name)
            .collect();
        if names.is_empty() {
            write!(f, "MASK_0x{:x}", self.0)
        } else {
            f.write_str(&names.join("+"))
        }
    }
}

/// Classes subscribed on the sentinel.
pub const WATCH_MASK: EventMask = EventMask(
    EventMask::OPEN.0
        | EventMask::MODIFY.0
        | EventMask::ATTRIB.0
        | EventMask::DELETE_SELF.0
        | EventMask::MOVE_SELF.0,
);

/// One decoded notification record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawEvent {
    pub wd: i32,
    pub mask: EventMask,
    pub cookie: u32,
    /// Length of the trailing (NUL padded) name field.
    pub name_len: u32,
}

impl RawEvent {
    pub fn new(mask: EventMask) -> Self {
        RawEvent {
            wd: 0,
            mask,
            cookie: 0,
            name_len: 0,
        }
    }
}

/// Result of a single poll.
#[derive(Debug, PartialEq, Eq)]
pub enum Poll {
    /// Every event of one read, in kernel order.
    Events(Vec<RawEvent>),
    /// Nothing to read yet; back off and retry.
    WouldBlock,
}

/// A subscription on one path. Dropping it releases the watch.
pub trait EventSource {
    /// Non-blocking read of pending events.
    fn poll(&mut self) -> Result<Poll, SubscriptionError>;
}

impl<S: EventSource + ?Sized> EventSource for Box<S> {
    fn poll(&mut self) -> Result<Poll, SubscriptionError> {
        (**self).poll()
    }
}

/// Size of `struct inotify_event` without its name.
pub const EVENT_HEADER_LEN: usize = 16;

fn ne_u32(header: &[u8], at: usize) -> u32 {
    u32::from_ne_bytes([header[at], header[at + 1], header[at + 2], header[at + 3]])
}

/// Decodes every inotify record in `buf`.
///
/// Each record is a 16 byte header (`wd`, `mask`, `cookie`, `len`, native
/// endian) followed by `len` name bytes. Lengths are checked before the
/// offset advances.
pub fn decode_events(buf: &[u8]) -> Result<Vec<RawEvent>, DecodeError> {
    let mut events = Vec::new();
    let mut offset = 0;

    while offset < buf.len() {
        let remaining = buf.len() - offset;
        let header = buf
            .get(offset..offset + EVENT_HEADER_LEN)
            .ok_or(DecodeError::TruncatedHeader { offset, remaining })?;

        let wd = ne_u32(header, 0) as i32;
        let mask = EventMask::from_bits(ne_u32(header, 4));
        let cookie = ne_u32(header, 8);
        let name_len = ne_u32(header, 12);

        let record_len = EVENT_HEADER_LEN
            .checked_add(name_len as usize)
            .filter(|len| *len <= remaining)
            .ok_or(DecodeError::TruncatedName {
                offset,
                name_len: name_len as usize,
                remaining: remaining - EVENT_HEADER_LEN,
            })?;

        events.push(RawEvent {
            wd,
            mask,
            cookie,
            name_len,
        });
        offset += record_len;
    }

    Ok(events)
}

/// Subscribes to the sentinel with the best mechanism for this platform.
pub fn subscribe(path: &Path) -> Result<Box<dyn EventSource + Send>, SubscriptionError> {
    #[cfg(target_os = "linux")]
    {
        Ok(Box::new(InotifySource::open(path)?))
    }
    #[cfg(not(target_os = "linux"))]
    {
        Ok(Box::new(NotifySource::open(path)?))
    }
}

#[cfg(target_os = "linux")]
pub use self::inotify::InotifySource;

#[cfg(target_os = "linux")]
mod inotify {
    use super::{EventSource, Poll, decode_events};
    use crate::error::SubscriptionError;
    use nix::sys::inotify::{AddWatchFlags, InitFlags, Inotify};
    use std::fs::File;
    use std::io::{self, Read};
    use std::os::fd::AsFd;
    use std::path::Path;

    const READ_BUFFER_LEN: usize = 4096;

    /// Inotify flags for every class in [`super::WATCH_MASK`].
    pub(super) fn watch_flags() -> AddWatchFlags {
        AddWatchFlags::IN_OPEN
            | AddWatchFlags::IN_MODIFY
            | AddWatchFlags::IN_ATTRIB
            | AddWatchFlags::IN_DELETE_SELF
            | AddWatchFlags::IN_MOVE_SELF
    }

    /// Non-blocking inotify instance with one watch on the sentinel.
    pub struct InotifySource {
        // Owns the watch; `reader` is a duplicate of its descriptor.
        _inotify: Inotify,
        reader: File,
        buf: Vec<u8>,
    }

    impl InotifySource {
        pub fn open(path: &Path) -> Result<Self, SubscriptionError> {
            let inotify = Inotify::init(InitFlags::IN_NONBLOCK | InitFlags::IN_CLOEXEC)
                .map_err(|e| SubscriptionError::Init(io::Error::from(e)))?;
            inotify
                .add_watch(path, watch_flags())
                .map_err(|e| SubscriptionError::AddWatch {
                    path: path.to_path_buf(),
                    source: io::Error::from(e),
                })?;

            // Raw bytes are read through a dup so `decode_events` does the parsing.
            let reader = inotify
                .as_fd()
                .try_clone_to_owned()
                .map_err(SubscriptionError::Init)?;

            Ok(InotifySource {
                _inotify: inotify,
                reader: File::from(reader),
                buf: vec![0u8; READ_BUFFER_LEN],
            })
        }
    }

    impl EventSource for InotifySource {
        fn poll(&mut self) -> Result<Poll, SubscriptionError> {
            match self.reader.read(&mut self.buf) {
                Ok(0) => Ok(Poll::WouldBlock),
                Ok(n) => Ok(Poll::Events(decode_events(&self.buf[..n])?)),
                Err(e) if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                ) =>
                {
                    Ok(Poll::WouldBlock)
                }
                Err(e) => Err(SubscriptionError::Read(e)),
            }
        }
    }
}

/// Translates a `notify` event kind into inotify class bits.
pub fn mask_for_kind(kind: &EventKind) -> EventMask {
    match kind {
        EventKind::Access(AccessKind::Open(_)) => EventMask::OPEN,
        EventKind::Modify(ModifyKind::Metadata(_)) => EventMask::ATTRIB,
        EventKind::Modify(ModifyKind::Name(_)) => EventMask::MOVE_SELF,
        EventKind::Modify(_) => EventMask::MODIFY,
        EventKind::Remove(_) => EventMask::DELETE_SELF,
        _ => EventMask::default(),
    }
}

/// Portable source backed by the `notify` crate's recommended watcher.
pub struct NotifySource {
    // Kept alive for the lifetime of the subscription.
    _watcher: RecommendedWatcher,
    rx: Receiver<notify::Result<Event>>,
}

impl NotifySource {
    pub fn open(path: &Path) -> Result<Self, SubscriptionError> {
        let (tx, rx) = mpsc::channel();
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| {
                let _ = tx.send(res);
            },
            notify::Config::default(),
        )?;
        watcher
            .watch(path, RecursiveMode::NonRecursive)
            .map_err(|e| SubscriptionError::AddWatch {
                path: path.to_path_buf(),
                source: std::io::Error::other(e),
            })?;
        Ok(NotifySource {
            _watcher: watcher,
            rx,
        })
    }
}

impl EventSource for NotifySource {
    fn poll(&mut self) -> Result<Poll, SubscriptionError> {
        let mut events = Vec::new();
        loop {
            match self.rx.try_recv() {
                Ok(Ok(event)) => {
                    let mask = mask_for_kind(&event.kind);
                    if !mask.is_empty() {
                        events.push(RawEvent::new(mask));
                    }
                }
                Ok(Err(e)) => return Err(e.into()),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => return Err(SubscriptionError::Disconnected),
            }
        }
        if events.is_empty() {
            Ok(Poll::WouldBlock)
        } else {
            Ok(Poll::Events(events))
        }
    }
}
