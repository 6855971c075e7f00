use locale_store::maintenance::MaintenanceOptions;
use locale_store::{DetectionSource, LocaleStore, StoreError};
use serde_json::json;

fn main() -> Result<(), StoreError> {
    env_logger::init();

    // Keep everything under a throwaway directory: the JSON file plays the role of
    // localStorage and the SQLite database the role of IndexedDB.
    let dir = std::env::temp_dir().join("locale-store-demo");
    let store = LocaleStore::builder().preset("development").data_dir(&dir).build()?;
    println!("backend chain: {:?}", store.backends());

    // Watch everything the store announces.
    store.add_event_listener("*", |ev| println!("  event {} {}", ev.event_type, ev.payload));

    // A visitor arrives: the header says Dutch, geo-IP says Belgium-French.
    store.record_detection_now("nl-BE", DetectionSource::Header, 0.7);
    store.record_detection_now("fr-BE", DetectionSource::GeoIp, 0.4);

    // They pick French explicitly.
    store.record_preference_now("fr-BE", DetectionSource::Manual);

    let history = store.get_detection_history();
    if let Some(h) = &history.data {
        println!("{} detections, served by {:?}", h.history.len(), history.source);
    }

    let stats = store.get_history_stats();
    println!("locales seen: {:?}, mean confidence {:.2}", stats.locale_counts, stats.average_confidence);

    println!("recommendations: {:#}", json!(store.get_maintenance_recommendations()));
    let summary = store.perform_maintenance(&MaintenanceOptions::default());
    println!("maintenance: {:?}", summary.data);

    println!("health: {:#}", json!(store.perform_health_check()));
    println!("download: {:#}", store.create_download_payload());
    Ok(())
}
