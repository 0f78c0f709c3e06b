//! Real kernel notifications on a provisioned sentinel, through inotify and
//! through the `notify` fallback.
#![cfg(target_os = "linux")]

use hawkdog::canary::ensure_sentinel;
use hawkdog::watch::{
    EventMask, EventSource, InotifySource, NotifySource, Poll, RawEvent, subscribe,
};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::thread;
use std::time::{Duration, Instant};

fn collect_until<S: EventSource>(source: &mut S, wanted: EventMask) -> Vec<RawEvent> {
    let deadline = Instant::now() + Duration::from_secs(5);
    let mut seen = Vec::new();
    while Instant::now() < deadline {
        match source.poll().unwrap() {
            Poll::Events(events) => {
                let done = events.iter().any(|e| e.mask.contains(wanted));
                seen.extend(events);
                if done {
                    break;
                }
            }
            Poll::WouldBlock => thread::sleep(Duration::from_millis(20)),
        }
    }
    seen
}

#[test]
fn test_empty_poll_would_block() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("creds.ini");
    ensure_sentinel(&path).unwrap();

    let mut source = InotifySource::open(&path).unwrap();
    assert_eq!(source.poll().unwrap(), Poll::WouldBlock);
}

#[test]
fn test_open_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("creds.ini");
    ensure_sentinel(&path).unwrap();

    let mut source = subscribe(&path).unwrap();
    drop(File::open(&path).unwrap());

    let events = collect_until(&mut source, EventMask::OPEN);
    assert!(events.iter().any(|e| e.mask.contains(EventMask::OPEN)));
}

#[test]
fn test_modify_and_chmod_reported() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("creds.ini");
    ensure_sentinel(&path).unwrap();

    let mut source = InotifySource::open(&path).unwrap();
    let mut file = OpenOptions::new().append(true).open(&path).unwrap();
    file.write_all(b"# touched\n").unwrap();
    drop(file);
    let events = collect_until(&mut source, EventMask::MODIFY);
    assert!(events.iter().any(|e| e.mask.contains(EventMask::MODIFY)));

    fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).unwrap();
    let events = collect_until(&mut source, EventMask::ATTRIB);
    assert!(events.iter().any(|e| e.mask.contains(EventMask::ATTRIB)));
}

#[test]
fn test_delete_reported() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("creds.ini");
    ensure_sentinel(&path).unwrap();

    let mut source = InotifySource::open(&path).unwrap();
    fs::remove_file(&path).unwrap();

    let events = collect_until(&mut source, EventMask::DELETE_SELF);
    assert!(events.iter().any(|e| e.mask.contains(EventMask::DELETE_SELF)));
}

#[test]
fn test_notify_fallback_reports_open_and_modify() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("creds.ini");
    ensure_sentinel(&path).unwrap();

    let mut source = NotifySource::open(&path).unwrap();
    let mut file = OpenOptions::new().append(true).open(&path).unwrap();
    file.write_all(b"# touched\n").unwrap();
    drop(file);

    let events = collect_until(&mut source, EventMask::MODIFY);
    let names: Vec<String> = events.iter().map(|e| e.mask.to_string()).collect();
    assert!(names.iter().any(|n| n == "OPEN"), "{names:?}");
    assert!(names.iter().any(|n| n == "MODIFY"), "{names:?}");
    let open_at = names.iter().position(|n| n == "OPEN").unwrap();
    let modify_at = names.iter().position(|n| n == "MODIFY").unwrap();
    assert!(open_at < modify_at, "{names:?}");
}
