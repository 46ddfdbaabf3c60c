//! Integration tests for the capped question history

use futures::future::join_all;
use tempfile::TempDir;
use vidqa::history::{CappedLog, HistoryItem, HistoryPatch, VideoInfo};
use vidqa::VidqaError;

fn item(ts: i64) -> HistoryItem {
    HistoryItem::new(
        VideoInfo::new(format!("video-{}", ts % 3), "A talk"),
        format!("Question {}", ts),
        ts,
    )
}

fn timestamps(items: &[HistoryItem]) -> Vec<i64> {
    items.iter().map(|i| i.timestamp).collect()
}

#[tokio::test]
async fn test_capacity_scenario() {
    let log = CappedLog::open_in_memory(3).unwrap();

    for ts in [10, 20, 30] {
        assert!(log.save_item(item(ts)).await.unwrap().is_empty());
    }
    let evicted = log.save_item(item(40)).await.unwrap();
    assert_eq!(evicted, vec![10]);

    let items = log.get_items(3).await.unwrap();
    assert_eq!(timestamps(&items), vec![40, 30, 20]);
}

#[tokio::test]
async fn test_saves_beyond_capacity_keep_newest() {
    let max = 7;
    let log = CappedLog::open_in_memory(max).unwrap();

    for ts in 1..=40 {
        log.save_item(item(ts)).await.unwrap();
        assert!(log.len().await.unwrap() <= max);
    }

    let items = log.get_items(max).await.unwrap();
    assert_eq!(timestamps(&items), (34..=40).rev().collect::<Vec<_>>());
}

#[tokio::test]
async fn test_get_items_more_than_stored() {
    let log = CappedLog::open_in_memory(200).unwrap();
    for ts in [5, 1, 3] {
        log.save_item(item(ts)).await.unwrap();
    }

    let items = log.get_items(50).await.unwrap();
    assert_eq!(timestamps(&items), vec![5, 3, 1]);
    assert!(log.get_items(0).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_update_last_item_patches_most_recent_match() {
    let log = CappedLog::open_in_memory(200).unwrap();
    for ts in 1..=5 {
        log.save_item(item(ts)).await.unwrap();
    }

    // video-1 is used by timestamps 1 and 4
    let updated = log
        .update_last_item(
            |i| i.video_info.id == "video-1",
            HistoryPatch::answer_url("https://chat.example/c/1"),
        )
        .await
        .unwrap();
    assert_eq!(updated.timestamp, 4);

    let items = log.get_items(5).await.unwrap();
    let answered: Vec<i64> = items
        .iter()
        .filter(|i| i.is_answered())
        .map(|i| i.timestamp)
        .collect();
    assert_eq!(answered, vec![4]);

    // The answered item no longer matches an "unanswered" search
    let next = log
        .update_last_item(
            |i| i.video_info.id == "video-1" && !i.is_answered(),
            HistoryPatch::answer_url("https://chat.example/c/2"),
        )
        .await
        .unwrap();
    assert_eq!(next.timestamp, 1);
}

#[tokio::test]
async fn test_update_last_item_not_found() {
    let log = CappedLog::open_in_memory(200).unwrap();
    log.save_item(item(1)).await.unwrap();

    let result = log
        .update_last_item(|_| false, HistoryPatch::answer_url("https://x"))
        .await;
    assert!(matches!(result, Err(VidqaError::NotFound(_))));
}

#[tokio::test]
async fn test_duplicate_timestamp_is_rejected_atomically() {
    let log = CappedLog::open_in_memory(2).unwrap();
    log.save_item(item(1)).await.unwrap();
    log.save_item(item(2)).await.unwrap();

    let result = log.save_item(item(2)).await;
    assert!(matches!(result, Err(VidqaError::DuplicateKey(2))));

    // Nothing was evicted by the failed write
    let items = log.get_items(10).await.unwrap();
    assert_eq!(timestamps(&items), vec![2, 1]);
}

#[tokio::test]
async fn test_remove_and_clear() {
    let log = CappedLog::open_in_memory(200).unwrap();
    for ts in 1..=4 {
        log.save_item(item(ts)).await.unwrap();
    }

    assert!(log.remove_item(2).await.unwrap());
    assert!(!log.remove_item(2).await.unwrap());
    assert_eq!(log.len().await.unwrap(), 3);

    assert_eq!(log.clear_history().await.unwrap(), 3);
    assert!(log.is_empty().await.unwrap());
    assert!(log.get_items(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_persists_across_reopen() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("nested").join("history.db");

    {
        let log = CappedLog::open(&path, 3).unwrap();
        for ts in [100, 200] {
            log.save_item(item(ts)).await.unwrap();
        }
        log.update_last_item(|_| true, HistoryPatch::answer_url("https://chat.example/c/9"))
            .await
            .unwrap();
    }

    let reopened = CappedLog::open(&path, 3).unwrap();
    let items = reopened.get_items(10).await.unwrap();
    assert_eq!(timestamps(&items), vec![200, 100]);
    assert_eq!(items[0].answer_url.as_deref(), Some("https://chat.example/c/9"));
}

#[tokio::test]
async fn test_smaller_capacity_on_reopen_trims_on_next_save() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("history.db");

    {
        let log = CappedLog::open(&path, 10).unwrap();
        for ts in 1..=6 {
            log.save_item(item(ts)).await.unwrap();
        }
    }

    let log = CappedLog::open(&path, 3).unwrap();
    assert_eq!(log.len().await.unwrap(), 6);

    let evicted = log.save_item(item(7)).await.unwrap();
    assert_eq!(evicted.len(), 4);
    assert_eq!(timestamps(&log.get_items(10).await.unwrap()), vec![7, 6, 5]);
}

#[tokio::test]
async fn test_concurrent_saves_respect_capacity() {
    let log = CappedLog::open_in_memory(10).unwrap();

    let saves = (1..=50).map(|ts| {
        let log = log.clone();
        tokio::spawn(async move { log.save_item(item(ts)).await })
    });
    for result in join_all(saves).await {
        result.unwrap().unwrap();
    }

    assert_eq!(log.len().await.unwrap(), 10);
    let items = log.get_items(10).await.unwrap();
    assert_eq!(timestamps(&items), (41..=50).rev().collect::<Vec<_>>());
}
