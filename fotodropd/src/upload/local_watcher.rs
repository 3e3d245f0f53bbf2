use std::path::{Path, PathBuf};

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

/// Watches the hot folder and emits paths of files that appear in it. A
/// file being written typically produces several events; the daemon dedups
/// per path before admission.
pub fn start_notify_watcher(
    root: &Path,
) -> notify::Result<(RecommendedWatcher, mpsc::UnboundedReceiver<PathBuf>)> {
    let (tx, rx) = mpsc::unbounded_channel();
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
        if let Ok(event) = res {
            for path in map_event(event) {
                let _ = tx.send(path);
            }
        }
    })?;
    watcher.watch(root, RecursiveMode::NonRecursive)?;
    Ok((watcher, rx))
}

fn map_event(event: Event) -> Vec<PathBuf> {
    match event.kind {
        EventKind::Create(_) | EventKind::Modify(_) => event.paths,
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_create_events_to_their_paths() {
        let event = Event {
            kind: EventKind::Create(notify::event::CreateKind::File),
            paths: vec![PathBuf::from("/incoming/DSC_0001.jpg")],
            attrs: Default::default(),
        };
        assert_eq!(
            map_event(event),
            vec![PathBuf::from("/incoming/DSC_0001.jpg")]
        );
    }

    #[test]
    fn ignores_remove_events() {
        let event = Event {
            kind: EventKind::Remove(notify::event::RemoveKind::File),
            paths: vec![PathBuf::from("/incoming/DSC_0001.jpg")],
            attrs: Default::default(),
        };
        assert!(map_event(event).is_empty());
    }
}
