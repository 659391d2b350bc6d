use chrono::NaiveDate;
use std::fs;

use cardwatch::models::{CardMetadata, DateTag};
use cardwatch::{DatasetStore, PricePipeline};

use super::*;

fn day(d: u32) -> DateTag {
    DateTag::from_date(NaiveDate::from_ymd_opt(2024, 5, d).unwrap())
}

#[tokio::test]
async fn test_first_run_bootstraps_dataset() {
    let site = FakeMarket::start().await;
    let dir = tempfile::tempdir().unwrap();
    site.serve(
        "UR",
        &[
            listing("001/078", "Pikachu ex", "https://img/a.jpg", "1,200円"),
            listing("002/078", "Mew ex", "https://img/b.jpg", "3,480円"),
        ],
    )
    .await;
    site.serve("SR", &[listing("101/078", "Eevee", PLACEHOLDER, "880円")]).await;

    let config = site.config(dir.path(), &["UR", "SR"]);
    let pipeline = PricePipeline::from_config(&config).unwrap();
    let summary = pipeline.run_once(&day(1)).await.unwrap();

    assert!(summary.saved);
    assert_eq!(summary.succeeded, vec!["UR".to_string(), "SR".to_string()]);
    assert!(summary.failed.is_empty());
    assert_eq!(summary.rows, 3);
    assert_eq!(summary.stats.inserted, 3);

    let store = DatasetStore::from_config(&config.storage);
    let history = store.load().unwrap();
    assert_eq!(history.dates(), &[day(1)]);
    assert_eq!(history.rows()[0].display_name, "Pikachu ex");
    assert_eq!(history.price(0, &day(1)), Some(1200));
    assert_eq!(history.price(2, &day(1)), Some(880));

    let metadata = store.load_metadata().unwrap();
    assert_eq!(metadata.len(), 3);
    assert_eq!(metadata[2].category, "SR");
    assert_eq!(metadata[2].image_ref, PLACEHOLDER);

    let raw = fs::read(store.price_path()).unwrap();
    assert!(raw.starts_with(b"\xEF\xBB\xBF"));
    let text = String::from_utf8(raw[3..].to_vec()).unwrap();
    assert_eq!(text.lines().next(), Some("index,card_name,img_src,p_20240501"));
}

#[tokio::test]
async fn test_second_day_appends_column_and_keeps_order() {
    let site = FakeMarket::start().await;
    let dir = tempfile::tempdir().unwrap();
    let config = site.config(dir.path(), &["UR", "SR"]);
    let pipeline = PricePipeline::from_config(&config).unwrap();

    site.serve(
        "UR",
        &[
            listing("001/078", "Pikachu ex", "https://img/a.jpg", "1,200円"),
            listing("002/078", "Mew ex", "https://img/b.jpg", "3,480円"),
        ],
    )
    .await;
    site.serve("SR", &[listing("101/078", "Eevee", PLACEHOLDER, "880円")]).await;
    pipeline.run_once(&day(1)).await.unwrap();

    // Day two: Mew is gone, Eevee gets its real image, a new card appears.
    site.reset().await;
    site.serve(
        "UR",
        &[
            listing("003/078", "Lugia", "https://img/c.jpg", "5,000円"),
            listing("001/078", "Pikachu ex", "https://img/a.jpg", "1,100円"),
        ],
    )
    .await;
    site.serve("SR", &[listing("101/078", "Eevee", "https://img/e.jpg", "900円")]).await;
    let summary = pipeline.run_once(&day(2)).await.unwrap();

    assert!(summary.saved);
    assert_eq!(summary.stats.reconciled, 1);
    assert_eq!(summary.stats.inserted, 1);
    assert_eq!(summary.stats.unobserved, 1);

    let history = pipeline.store().load().unwrap();
    assert_eq!(history.dates(), &[day(1), day(2)]);
    let names: Vec<&str> = history.rows().iter().map(|r| r.display_name.as_str()).collect();
    assert_eq!(names, vec!["Pikachu ex", "Mew ex", "Eevee", "Lugia"]);

    assert_eq!(history.price(0, &day(1)), Some(1200));
    assert_eq!(history.price(0, &day(2)), Some(1100));
    assert_eq!(history.price(1, &day(2)), None);
    assert_eq!(history.rows()[2].image_ref, "https://img/e.jpg");
    assert_eq!(history.price(2, &day(1)), Some(880));
    assert_eq!(history.price(2, &day(2)), Some(900));
    assert_eq!(history.price(3, &day(1)), None);
    assert_eq!(history.price(3, &day(2)), Some(5000));

    let metadata = pipeline.store().load_metadata().unwrap();
    let names: Vec<&str> = metadata.iter().map(|m| m.display_name.as_str()).collect();
    assert_eq!(names, vec!["Lugia", "Pikachu ex", "Eevee"]);
}

#[tokio::test]
async fn test_slow_category_does_not_block_others() {
    let site = FakeMarket::start().await;
    let dir = tempfile::tempdir().unwrap();
    let categories = ["UR", "HR", "SR", "SAR", "CSR", "SSR", "PROMO"];

    for (i, category) in categories.iter().enumerate() {
        if *category == "SAR" {
            site.stall(category).await;
            continue;
        }
        let index = format!("{:03}/100", i);
        let name = format!("{} card", category);
        site.serve(category, &[listing(&index, &name, "https://img/x.jpg", "100円")]).await;
    }

    let config = site.config(dir.path(), &categories);
    let pipeline = PricePipeline::from_config(&config).unwrap();
    let summary = pipeline.run_once(&day(1)).await.unwrap();

    assert!(summary.saved);
    assert_eq!(summary.succeeded.len(), 6);
    assert_eq!(summary.failed.len(), 1);
    assert_eq!(summary.failed[0].0, "SAR");
    assert_eq!(summary.rows, 6);

    let history = pipeline.store().load().unwrap();
    assert!(history.rows().iter().all(|r| r.display_name != "SAR card"));
    // Rows follow category order.
    assert_eq!(history.rows()[0].display_name, "UR card");
    assert_eq!(history.rows()[5].display_name, "PROMO card");
}

#[tokio::test]
async fn test_rerun_same_date_is_idempotent() {
    let site = FakeMarket::start().await;
    let dir = tempfile::tempdir().unwrap();
    site.serve(
        "UR",
        &[
            listing("001/078", "Pikachu ex", "https://img/a.jpg", "1,200円"),
            listing("002/078", "Mew ex", PLACEHOLDER, "3,480円"),
        ],
    )
    .await;

    let config = site.config(dir.path(), &["UR"]);
    let pipeline = PricePipeline::from_config(&config).unwrap();

    pipeline.run_once(&day(1)).await.unwrap();
    let prices_first = fs::read(pipeline.store().price_path()).unwrap();
    let metadata_first = fs::read(pipeline.store().metadata_path()).unwrap();

    let summary = pipeline.run_once(&day(1)).await.unwrap();
    assert_eq!(summary.stats.inserted, 0);
    assert_eq!(summary.stats.matched, 2);

    assert_eq!(fs::read(pipeline.store().price_path()).unwrap(), prices_first);
    assert_eq!(fs::read(pipeline.store().metadata_path()).unwrap(), metadata_first);
}

#[tokio::test]
async fn test_all_categories_failing_leaves_dataset_untouched() {
    let site = FakeMarket::start().await;
    let dir = tempfile::tempdir().unwrap();
    site.serve("UR", &[listing("001/078", "Pikachu ex", "https://img/a.jpg", "1,200円")]).await;

    let config = site.config(dir.path(), &["UR", "SR"]);
    site.serve("SR", &[]).await;
    let pipeline = PricePipeline::from_config(&config).unwrap();
    pipeline.run_once(&day(1)).await.unwrap();
    let before = fs::read(pipeline.store().price_path()).unwrap();

    site.reset().await;
    site.fail("UR", 500).await;
    site.fail("SR", 503).await;
    let summary = pipeline.run_once(&day(2)).await.unwrap();

    assert!(!summary.saved);
    assert!(summary.succeeded.is_empty());
    assert_eq!(summary.failed.len(), 2);
    assert_eq!(fs::read(pipeline.store().price_path()).unwrap(), before);
    assert!(pipeline.store().lock().is_ok());
}

#[tokio::test]
async fn test_corrupt_history_aborts_run() {
    let site = FakeMarket::start().await;
    let dir = tempfile::tempdir().unwrap();
    site.serve("UR", &[listing("001/078", "Pikachu ex", "https://img/a.jpg", "1,200円")]).await;

    let config = site.config(dir.path(), &["UR"]);
    let price_path = &config.storage.price_history_path;
    fs::create_dir_all(price_path.parent().unwrap()).unwrap();
    let corrupt = "index,card_name,img_src,p_20240501\n001/078,Pikachu ex,https://img/a.jpg,cheap\n";
    fs::write(price_path, corrupt).unwrap();

    let pipeline = PricePipeline::from_config(&config).unwrap();
    let result = pipeline.run_once(&day(2)).await;

    assert!(matches!(result, Err(cardwatch::AppError::Dataset { .. })));
    assert_eq!(fs::read_to_string(price_path).unwrap(), corrupt);
}

#[tokio::test]
async fn test_metadata_snapshot_reflects_latest_run_only() {
    let site = FakeMarket::start().await;
    let dir = tempfile::tempdir().unwrap();
    let config = site.config(dir.path(), &["UR"]);
    let pipeline = PricePipeline::from_config(&config).unwrap();

    site.serve("UR", &[listing("001/078", "Pikachu ex", "https://img/a.jpg", "1,200円")]).await;
    pipeline.run_once(&day(1)).await.unwrap();

    site.reset().await;
    site.serve("UR", &[listing("002/078", "Mew ex", "https://img/b.jpg", "3,000円")]).await;
    pipeline.run_once(&day(2)).await.unwrap();

    let metadata = pipeline.store().load_metadata().unwrap();
    assert_eq!(
        metadata,
        vec![CardMetadata {
            position_index: "002/078".to_string(),
            category: "UR".to_string(),
            display_name: "Mew ex".to_string(),
            image_ref: "https://img/b.jpg".to_string(),
        }]
    );
    assert_eq!(pipeline.store().load().unwrap().len(), 2);
}

#[tokio::test]
async fn test_backdated_run_fills_history_without_becoming_current() {
    let site = FakeMarket::start().await;
    let dir = tempfile::tempdir().unwrap();
    let config = site.config(dir.path(), &["UR"]);
    let pipeline = PricePipeline::from_config(&config).unwrap();

    site.serve("UR", &[listing("001/078", "Pikachu ex", "https://img/a.jpg", "1,200円")]).await;
    pipeline.run_once(&day(2)).await.unwrap();
    let metadata_current = fs::read(pipeline.store().metadata_path()).unwrap();

    site.reset().await;
    site.serve(
        "UR",
        &[
            listing("001/078", "Pikachu ex", "https://img/a.jpg", "900円"),
            listing("002/078", "Mew ex", "https://img/b.jpg", "3,000円"),
        ],
    )
    .await;
    let summary = pipeline.run_once(&day(1)).await.unwrap();
    assert!(summary.saved);

    let history = pipeline.store().load().unwrap();
    assert_eq!(history.dates(), &[day(1), day(2)]);
    assert_eq!(history.latest_date(), Some(&day(2)));
    assert_eq!(history.latest_price(0), Some(1200));
    assert_eq!(history.price(0, &day(1)), Some(900));
    assert_eq!(history.price(1, &day(2)), None);

    let text = fs::read_to_string(pipeline.store().price_path()).unwrap();
    assert!(text.lines().next().unwrap().ends_with("p_20240501,p_20240502"));
    assert_eq!(fs::read(pipeline.store().metadata_path()).unwrap(), metadata_current);
}
