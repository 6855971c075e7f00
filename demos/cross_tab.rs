use std::sync::Arc;
use std::time::Duration;

use locale_store::backend::MemoryBackend;
use locale_store::{DetectionSource, LocaleStore, StoreError};

#[tokio::main]
async fn main() -> Result<(), StoreError> {
    env_logger::init();

    // Two "tabs" share one physical store but each has its own event bus and
    // read cache. Nothing locks the shared key: the last writer wins.
    let shared = Arc::new(MemoryBackend::new());

    let tab_a = LocaleStore::builder().preset("test").backend(shared.clone()).build()?;
    let tab_b = LocaleStore::builder().preset("test").backend(shared).build()?;

    let mut rx = tab_a.subscribe();
    let listener = tokio::spawn(async move {
        while let Ok(ev) = rx.recv().await {
            println!("tab A announced {} {}", ev.event_type, ev.payload);
        }
    });

    tab_a.record_detection_now("de-CH", DetectionSource::Header, 0.9);
    tab_a.record_preference_now("fr-CH", DetectionSource::Manual);

    // "test" disables the read cache, so tab B sees tab A's data immediately.
    let seen_by_b = tab_b.get_detection_history();
    println!("tab B sees {:?}", seen_by_b.data.map(|h| h.history));

    tokio::time::sleep(Duration::from_millis(50)).await;
    drop(tab_a);
    listener.abort();
    Ok(())
}
