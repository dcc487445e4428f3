//! End-to-end scheduling lifecycle tests
//!
//! Exercises the full pipeline against the mock publishing API: recurring
//! rules produce available slots, uploaded media pairs with captions, the
//! batch lands in those slots, triggers fire into the publish state machine,
//! and the calendar reflects every transition.

use std::sync::Arc;

use chrono::{Duration, Utc};
use libpagecast::api::{MockPagesApi, PagesApi};
use libpagecast::blob::{BlobStore, DiskBlobStore};
use libpagecast::calendar::RecurringCalendar;
use libpagecast::credentials::CredentialManager;
use libpagecast::crypto::TokenCipher;
use libpagecast::pairing::{pair, CaptionItem, MediaItem, PairingMethod};
use libpagecast::trigger::MockTrigger;
use libpagecast::types::TokenData;
use libpagecast::{Database, PostQuery, PostStatus, Scheduler};

struct Harness {
    db: Database,
    scheduler: Arc<Scheduler>,
    calendar: RecurringCalendar,
    api: Arc<MockPagesApi>,
    triggers: Arc<MockTrigger>,
    blobs: Arc<DiskBlobStore>,
    _media_dir: tempfile::TempDir,
}

async fn harness() -> Harness {
    let db = Database::in_memory().await.unwrap();
    let cipher = Arc::new(TokenCipher::from_key(&[11u8; 32]));
    let api = Arc::new(MockPagesApi::new());
    let triggers = Arc::new(MockTrigger::new());
    let media_dir = tempfile::tempdir().unwrap();
    let blobs = Arc::new(DiskBlobStore::new(
        media_dir.path(),
        "http://localhost/media",
    ));

    let credentials = Arc::new(CredentialManager::new(
        db.clone(),
        cipher,
        api.clone(),
        chrono_tz::UTC,
        1,
    ));
    let mut page_token = TokenData::new("page-token".to_string());
    page_token.is_long_lived = true;
    credentials
        .store_page_token("page-77", &page_token)
        .await
        .unwrap();

    let scheduler = Arc::new(Scheduler::new(
        db.clone(),
        credentials,
        api.clone(),
        triggers.clone(),
        blobs.clone(),
        chrono_tz::UTC,
        false,
    ));
    let calendar = RecurringCalendar::new(db.clone(), chrono_tz::UTC);

    Harness {
        db,
        scheduler,
        calendar,
        api,
        triggers,
        blobs,
        _media_dir: media_dir,
    }
}

#[tokio::test]
async fn full_pipeline_from_rules_to_published() {
    let h = harness().await;

    // Rules on every weekday so any target date offers slots.
    let all_days = [0u8, 1, 2, 3, 4, 5, 6];
    h.calendar.create_rule("10:00", &all_days).await.unwrap();
    h.calendar.create_rule("15:30", &all_days).await.unwrap();

    let target = (Utc::now() + Duration::days(3)).date_naive();
    let slots = h.calendar.available_slots(target).await.unwrap();
    assert_eq!(slots, vec!["10:00".to_string(), "15:30".to_string()]);

    // Store two media files and pair them against caption files by name.
    let a = h.blobs.store("promo1.jpg", b"one").await.unwrap();
    let b = h.blobs.store("promo2.jpg", b"two").await.unwrap();
    let media = vec![
        MediaItem {
            id: "m1".to_string(),
            filename: "promo1.jpg".to_string(),
            media: a.clone(),
        },
        MediaItem {
            id: "m2".to_string(),
            filename: "promo2.jpg".to_string(),
            media: b.clone(),
        },
    ];
    let captions = vec![
        CaptionItem {
            filename: "cap1.txt".to_string(),
            content: "First post".to_string(),
        },
        CaptionItem {
            filename: "cap2.txt".to_string(),
            content: "Second post".to_string(),
        },
    ];

    let outcome = pair(&media, &captions, PairingMethod::Filename, &[], &[]);
    assert_eq!(outcome.units.len(), 2);

    // Batch the paired units into the available slots.
    let batch = h
        .scheduler
        .schedule_batch("page-77", &outcome.units, target, &slots, false, 1)
        .await
        .unwrap();
    assert_eq!(batch.scheduled_count, 2);
    assert!(batch.errors.is_empty());

    // Both slots are now occupied; the calendar offers nothing more.
    assert!(h.calendar.available_slots(target).await.unwrap().is_empty());

    // A second identical batch cannot double-book.
    let retry = h
        .scheduler
        .schedule_batch("page-77", &outcome.units, target, &slots, false, 1)
        .await
        .unwrap();
    assert_eq!(retry.scheduled_count, 0);
    assert_eq!(retry.errors.len(), 2);

    // Both posts got local triggers.
    for post_id in &batch.post_ids {
        assert_eq!(h.triggers.registration_count(*post_id), 1);
    }

    // Force the first post due and fire its trigger.
    let due = (Utc::now() - Duration::minutes(1)).naive_utc();
    h.db.update_post_fields(batch.post_ids[0], None, None, Some(&due), &due)
        .await
        .unwrap();
    let publish = h.scheduler.publish(batch.post_ids[0]).await;
    assert_eq!(publish, libpagecast::PublishOutcome::Published);

    let published = h
        .scheduler
        .get_post(batch.post_ids[0])
        .await
        .unwrap()
        .unwrap();
    assert_eq!(published.status, PostStatus::Published);
    assert!(published.permalink.contains("page-77"));

    // Publishing released the 10:00 slot; 15:30 is still held.
    let remaining = h.calendar.available_slots(target).await.unwrap();
    assert_eq!(remaining, vec!["10:00".to_string()]);

    // The local media file for the published post is gone; the pending
    // post's file is still there.
    assert!(!std::path::Path::new(&a.local_path).exists());
    assert!(std::path::Path::new(&b.local_path).exists());

    // Exactly one create call crossed the wire.
    assert_eq!(
        h.api.create_calls.load(std::sync::atomic::Ordering::SeqCst),
        1
    );

    // The month view still shows the pending post on the target date.
    let view = h
        .calendar
        .month_view(
            chrono::Datelike::year(&target),
            chrono::Datelike::month(&target),
        )
        .await
        .unwrap();
    let day = view
        .days
        .iter()
        .find(|d| d.date == target)
        .expect("target day present");
    assert_eq!(
        day.scheduled,
        vec![("15:30".to_string(), PostStatus::Scheduled)]
    );

    // And the published post shows up (time + status only) on the date it
    // actually went out.
    let due_date = due.date();
    let view = h
        .calendar
        .month_view(
            chrono::Datelike::year(&due_date),
            chrono::Datelike::month(&due_date),
        )
        .await
        .unwrap();
    let day = view
        .days
        .iter()
        .find(|d| d.date == due_date)
        .expect("due day present");
    assert!(day
        .scheduled
        .iter()
        .any(|(_, status)| *status == PostStatus::Published));
}

#[tokio::test]
async fn failed_post_retries_then_lands() {
    let h = harness().await;
    h.api.set_fail_creates(true);

    // Insert a due post directly.
    let due = (Utc::now() - Duration::minutes(5)).naive_utc();
    let id = h
        .db
        .insert_post(
            &libpagecast::db::NewScheduledPost {
                page_id: "page-77".to_string(),
                message: "retry me".to_string(),
                link: String::new(),
                images: vec![],
                video_url: String::new(),
                video_path: String::new(),
                kind: libpagecast::PostKind::Single,
                share_to_story: false,
                scheduled_time: due,
                timezone: "UTC".to_string(),
                created_by: 1,
            },
            &due,
        )
        .await
        .unwrap();

    // First attempt fails and schedules a retry.
    let outcome = h.scheduler.publish(id).await;
    assert!(matches!(
        outcome,
        libpagecast::PublishOutcome::Failed {
            retry_scheduled: true,
            ..
        }
    ));
    assert_eq!(h.triggers.registration_count(id), 1);

    // The service recovers; the retry fire succeeds.
    h.api.set_fail_creates(false);
    let outcome = h.scheduler.publish(id).await;
    assert_eq!(outcome, libpagecast::PublishOutcome::Published);

    let post = h.scheduler.get_post(id).await.unwrap().unwrap();
    assert_eq!(post.status, PostStatus::Published);
    assert_eq!(post.retry_count, 1);
    assert_eq!(post.error_message, "");
}

#[tokio::test]
async fn deleting_a_remote_post_cancels_everything() {
    let h = harness().await;

    // Schedule a post and pretend it was handed to the remote scheduler.
    let when = (Utc::now() + Duration::hours(6)).naive_utc();
    let id = h
        .scheduler
        .schedule(&libpagecast::scheduler::NewPostRequest {
            page_id: "page-77".to_string(),
            message: "to be deleted".to_string(),
            link: String::new(),
            images: vec![],
            video: None,
            share_to_story: false,
            scheduled_time: when,
            created_by: 1,
        })
        .await
        .unwrap();
    let now = Utc::now().naive_utc();
    h.db.mark_scheduled_remote(id, "page-77_999", &now)
        .await
        .unwrap();

    assert!(h.scheduler.delete_post(id).await.unwrap());
    assert!(h.scheduler.get_post(id).await.unwrap().is_none());
    assert!(h.triggers.was_cancelled(id));
    assert!(h
        .api
        .deleted
        .lock()
        .unwrap()
        .contains(&"page-77_999".to_string()));

    let posts = h.scheduler.list_posts(&PostQuery::default()).await.unwrap();
    assert!(posts.is_empty());
}

#[tokio::test]
async fn mock_api_honors_pages_trait() {
    // Exercise the trait object path the daemon uses.
    let api: Arc<dyn PagesApi> = Arc::new(MockPagesApi::new());
    let exchanged = api.exchange_token("short").await.unwrap();
    assert!(exchanged.is_long_lived);

    let info = api.debug_token(&exchanged.access_token).await.unwrap();
    assert!(info.is_usable_at(Utc::now().timestamp()));
}
