use chrono::{Duration as ChronoDuration, Local};
use rental_scout::config::CityConfig;
use rental_scout::harvest::{HarvestPipeline, HarvestSettings, PhotoStore};
use rental_scout::models::{Candidate, QualityTier, RunStats, TIMESTAMP_FORMAT};
use rental_scout::scrapers::interception::{InterceptionSession, SessionTimings};
use rental_scout::scrapers::traits::ListingSource;
use rental_scout::scrapers::types::AdvanceMethod;
use rental_scout::storage::{PersistenceSink, SqliteStore};
use rental_scout::test_utils::{photo_url, FakeSource, ScriptedBrowser};
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const TABLE: &str = "Apartments_Lviv";

fn city() -> CityConfig {
    CityConfig {
        name: "Lviv".to_string(),
        city_id: 5,
        table: TABLE.to_string(),
        channels: vec!["@lviv".to_string()],
        hours_limit: 24,
    }
}

fn settings() -> HarvestSettings {
    HarvestSettings {
        max_pages: 2,
        max_photos: 5,
        min_rooms: 1,
        min_area: 25.0,
        realty_type: 2,
        operation: 3,
        page_limit: 20,
        page_pause: Duration::ZERO,
        candidate_pause: Duration::ZERO,
        blocked_phones: HashSet::new(),
    }
}

fn stored(id: u64) -> Candidate {
    Candidate {
        id,
        description: "already here".to_string(),
        address: String::new(),
        price: 9000,
        floor: 1,
        floors_count: 4,
        rooms: 1,
        area: 28.0,
        phone: None,
        published_at: Local::now().naive_local(),
        photo_assets: Vec::new(),
        posted: false,
    }
}

#[tokio::test]
async fn harvest_filters_dedups_and_merges_photo_tiers() {
    let dir = tempfile::tempdir().unwrap();
    let published = (Local::now().naive_local() - ChronoDuration::hours(2))
        .format(TIMESTAMP_FORMAT)
        .to_string();

    let source = Arc::new(
        FakeSource::new()
            .with_page(0, vec![1, 2, 3])
            .with_detail(1, json!({ "rooms_count": 2, "total_square_meters": 40 }))
            .with_detail(
                2,
                json!({
                    "publishing_date": published,
                    "rooms_count": 2,
                    "total_square_meters": 52.5,
                    "beautiful_url": "realty-dolgosrochnaya-arenda-kvartira-lvov-2.html",
                    "description_uk": "Квартира біля парку",
                    "price": 16000,
                    "street_name_uk": "вул. Стрийська",
                    "building_number_str": "45",
                }),
            ),
    );

    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    store.ensure_table(TABLE).unwrap();
    store.insert_if_absent(TABLE, &stored(3)).unwrap();

    let browser = ScriptedBrowser::new()
        .on_reveal(vec![photo_url("k1", "lg")])
        .on_advance(AdvanceMethod::NextButton, vec![photo_url("k2", "lg")])
        .on_advance(AdvanceMethod::NextButton, vec![photo_url("k1", "fx")]);
    let log = browser.log();

    let pipeline = HarvestPipeline::new(
        Arc::clone(&source) as Arc<dyn ListingSource>,
        Arc::clone(&store) as Arc<dyn PersistenceSink>,
        PhotoStore::new(dir.path()),
        settings(),
    );

    let stats = pipeline
        .run(
            &city(),
            move || {
                InterceptionSession::open(
                    browser,
                    SessionTimings::immediate(),
                    64,
                    "https://dom.ria.com",
                )
            },
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(
        stats,
        RunStats {
            total_found: 3,
            shown: 1,
            filtered_empty_date: 1,
            skipped_existing: 1,
            ..Default::default()
        }
    );

    // Stored listings cost no detail request.
    assert_eq!(source.detail_requests(), vec![1, 2]);

    // Only the accepted listing was opened in the browser.
    assert_eq!(
        log.lock().unwrap().visited,
        vec!["https://dom.ria.com/uk/realty-dolgosrochnaya-arenda-kvartira-lvov-2.html".to_string()]
    );

    let since = Local::now().naive_local() - ChronoDuration::hours(24);
    let rows = store.unposted_since(TABLE, since, 10).unwrap();
    let harvested = rows.iter().find(|c| c.id == 2).unwrap();
    assert_eq!(harvested.address, "вул. Стрийська, буд. 45");
    assert_eq!(harvested.photo_assets.len(), 2);
    assert_eq!(harvested.photo_assets[0].tier, QualityTier::Fx);
    assert_eq!(harvested.photo_assets[1].tier, QualityTier::Lg);
    assert!(dir.path().join("2_fx_1.jpg").exists());
    assert!(dir.path().join("2_lg_2.jpg").exists());

    // The best tier was downloaded for k1.
    let k1 = std::fs::read(dir.path().join("2_fx_1.jpg")).unwrap();
    assert_eq!(k1, photo_url("k1", "fx").into_bytes());
}

#[tokio::test]
async fn second_run_skips_everything_already_stored() {
    let dir = tempfile::tempdir().unwrap();
    let published = (Local::now().naive_local() - ChronoDuration::minutes(30))
        .format(TIMESTAMP_FORMAT)
        .to_string();
    let source = Arc::new(FakeSource::new().with_page(0, vec![7]).with_detail(
        7,
        json!({
            "publishing_date": published,
            "rooms_count": 1,
            "total_square_meters": 30,
            "beautiful_url": "realty-7.html",
        }),
    ));
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let pipeline = HarvestPipeline::new(
        Arc::clone(&source) as Arc<dyn ListingSource>,
        Arc::clone(&store) as Arc<dyn PersistenceSink>,
        PhotoStore::new(dir.path()),
        settings(),
    );

    for expected_shown in [1, 0] {
        let stats = pipeline
            .run(
                &city(),
                || {
                    InterceptionSession::open(
                        ScriptedBrowser::new(),
                        SessionTimings::immediate(),
                        64,
                        "https://dom.ria.com",
                    )
                },
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(stats.shown, expected_shown);
    }

    assert_eq!(source.detail_requests(), vec![7]);
    assert_eq!(store.table_stats(TABLE).unwrap().total, 1);
}
