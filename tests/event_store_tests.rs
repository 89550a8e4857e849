//! Integration tests for the SQLite event store

use std::collections::HashSet;
use std::sync::Arc;
use std::thread;

use serde_json::{json, Map, Value};

use hookwatch::event_store::{ConnectionConfig, EventStore};
use hookwatch::types::{ChatMessage, EventFilter, HookEventType, NewEvent};

fn setup_store() -> (Arc<EventStore>, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let store =
        EventStore::open(dir.path().join("events.db"), &ConnectionConfig::default()).unwrap();
    (Arc::new(store), dir)
}

fn payload(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => panic!("expected object, got {other}"),
    }
}

fn event(app: &str, session: &str, event_type: HookEventType) -> NewEvent {
    NewEvent::new(app, session, event_type, Map::new())
}

#[test]
fn test_concurrent_inserts_get_unique_ids() {
    let (store, _dir) = setup_store();
    let threads = 8;
    let per_thread = 25;

    let handles: Vec<_> = (0..threads)
        .map(|t| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                (0..per_thread)
                    .map(|i| {
                        store
                            .insert(&event(&format!("app-{t}"), &format!("s-{i}"), HookEventType::PreToolUse))
                            .unwrap()
                            .id
                    })
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let mut ids = HashSet::new();
    for handle in handles {
        for id in handle.join().unwrap() {
            assert!(ids.insert(id), "id {id} assigned twice");
        }
    }

    let total = (threads * per_thread) as u64;
    assert_eq!(ids.len() as u64, total);
    assert_eq!(store.stats().unwrap().total_events, total);
    assert_eq!(store.count(&EventFilter::new()).unwrap(), total);
}

#[test]
fn test_ids_and_created_at_are_monotonic() {
    let (store, _dir) = setup_store();
    let mut previous = store.insert(&event("app", "s", HookEventType::Stop)).unwrap();
    for _ in 0..20 {
        let next = store.insert(&event("app", "s", HookEventType::Stop)).unwrap();
        assert!(next.id > previous.id);
        assert!(next.created_at >= previous.created_at);
        previous = next;
    }
}

#[test]
fn test_nested_payload_round_trips() {
    let (store, _dir) = setup_store();
    let body = payload(json!({
        "tool_name": "Bash",
        "tool_input": {"command": "echo 'héllo 世界 🚀'", "args": [1, 2.5, null, true]},
        "nested": {"deep": {"deeper": {"list": [{"k": "v"}, []]}}},
        "empty": {},
        "nothing": null
    }));
    let chat = vec![
        ChatMessage::new("user", "fix the build"),
        ChatMessage::new("assistant", json!([{"type": "text", "text": "done ✅"}])),
    ];
    let new = NewEvent::new("app", "s", HookEventType::PostToolUse, body)
        .with_summary("ran a command")
        .with_chat(chat);

    let stored = store.insert(&new).unwrap();
    let fetched = store.get_by_id(stored.id).unwrap().unwrap();

    assert!(fetched.matches(&new));
    assert_eq!(fetched, stored);
    assert_eq!(fetched.payload["nothing"], Value::Null);
}

#[test]
fn test_transcript_entries_are_stored_verbatim() {
    let (store, _dir) = setup_store();
    let transcript = json!([
        {"type": "user", "message": {"role": "user", "content": "hi"}, "uuid": "u1"},
        {"role": "assistant", "content": null},
        {}
    ]);
    let chat: Vec<ChatMessage> = serde_json::from_value(transcript.clone()).unwrap();
    let new = NewEvent::new("app", "s", HookEventType::Stop, payload(json!({}))).with_chat(chat);

    let stored = store.insert(&new).unwrap();
    let fetched = store.get_by_id(stored.id).unwrap().unwrap();

    assert_eq!(serde_json::to_value(&fetched.chat).unwrap(), transcript);
}

#[test]
fn test_filter_by_source_app() {
    let (store, _dir) = setup_store();
    for app in ["A", "B", "A", "C", "A"] {
        store.insert(&event(app, "s", HookEventType::Notification)).unwrap();
    }

    let filter = EventFilter::new().source_app("A");
    let events = store.query(&filter).unwrap();
    assert_eq!(events.len(), 3);
    assert!(events.iter().all(|e| e.source_app == "A"));
    assert_eq!(store.count(&filter).unwrap(), 3);

    // newest first
    let ids: Vec<_> = events.iter().map(|e| e.id).collect();
    let mut sorted = ids.clone();
    sorted.sort_unstable_by(|a, b| b.cmp(a));
    assert_eq!(ids, sorted);
}

#[test]
fn test_pagination_covers_everything_once() {
    let (store, _dir) = setup_store();
    for i in 0..23 {
        store.insert(&event("app", &format!("s-{i}"), HookEventType::Stop)).unwrap();
    }

    let mut seen = HashSet::new();
    let mut offset = 0;
    loop {
        let page = store.page(&EventFilter::new().page(5, offset)).unwrap();
        assert_eq!(page.total, 23);
        if page.events.is_empty() {
            break;
        }
        for e in &page.events {
            assert!(seen.insert(e.id), "event {} returned twice", e.id);
        }
        offset += page.events.len();
    }
    assert_eq!(seen.len(), 23);
}

#[test]
fn test_search_matches_payload_and_summary() {
    let (store, _dir) = setup_store();
    store
        .insert(&NewEvent::new(
            "app",
            "s",
            HookEventType::PreToolUse,
            payload(json!({"command": "cargo fmt"})),
        ))
        .unwrap();
    store
        .insert(&event("app", "s", HookEventType::Stop).with_summary("formatted with cargo"))
        .unwrap();
    store
        .insert(&NewEvent::new(
            "app",
            "s",
            HookEventType::PreToolUse,
            payload(json!({"command": "100% done"})),
        ))
        .unwrap();

    assert_eq!(store.count(&EventFilter::new().search("cargo")).unwrap(), 2);
    // wildcards are literal
    assert_eq!(store.count(&EventFilter::new().search("100%")).unwrap(), 1);
    assert_eq!(store.count(&EventFilter::new().search("%")).unwrap(), 1);
}

#[test]
fn test_retention_sweep_twice_is_noop() {
    let (store, _dir) = setup_store();
    store.insert(&event("app", "s", HookEventType::Stop)).unwrap();

    // nothing is a day old yet
    assert_eq!(store.retention_sweep(1).unwrap(), 0);
    assert_eq!(store.retention_sweep(1).unwrap(), 0);
    assert_eq!(store.count(&EventFilter::new()).unwrap(), 1);
}

#[test]
fn test_reopen_keeps_events() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("events.db");
    let id = {
        let store = EventStore::open(&path, &ConnectionConfig::default()).unwrap();
        store.insert(&event("app", "s", HookEventType::UserPromptSubmit)).unwrap().id
    };

    let store = EventStore::open(&path, &ConnectionConfig::default()).unwrap();
    let fetched = store.get_by_id(id).unwrap().unwrap();
    assert_eq!(fetched.event_type, HookEventType::UserPromptSubmit);
    let next = store.insert(&event("app", "s", HookEventType::Stop)).unwrap();
    assert!(next.id > id);
}
