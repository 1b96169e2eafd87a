use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::sync::Arc;

use tokio_test::{assert_err, assert_ok};

use super::guard::now_ms;
use super::*;
use crate::paging::{parse_sort, PageRequest};

const D: Ms = 86_400_000; // 1 day in ms

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("lendit_test_engine");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

fn page(from: usize, size: usize) -> PageRequest {
    PageRequest::from_offset(from, NonZeroUsize::new(size).unwrap())
}

fn all() -> PageRequest {
    page(0, 1000)
}

struct Fixture {
    engine: Engine,
    owner: Id,
    booker: Id,
    other: Id,
    item: Id,
}

async fn fixture(name: &str) -> Fixture {
    let engine = Engine::new(test_wal_path(name)).unwrap();
    let owner = engine.create_user("Olga".into(), "olga@example.com".into()).await.unwrap().id;
    let booker = engine.create_user("Boris".into(), "boris@example.com".into()).await.unwrap().id;
    let other = engine.create_user("Uma".into(), "uma@example.com".into()).await.unwrap().id;
    let item = engine
        .create_item(owner, "Drill".into(), "Cordless drill".into(), true, None)
        .await
        .unwrap()
        .id;
    Fixture {
        engine,
        owner,
        booker,
        other,
        item,
    }
}

fn ids(rows: &[BookingInfo]) -> Vec<Id> {
    rows.iter().map(|b| b.id).collect()
}

fn is_not_found(err: &EngineError, kind: EntityKind, reason: NotFoundReason) -> bool {
    matches!(err, EngineError::NotFound { kind: k, reason: r, .. } if *k == kind && *r == reason)
}

// ── Users ────────────────────────────────────────────────

#[tokio::test]
async fn user_ids_start_at_one() {
    let engine = Engine::new(test_wal_path("user_ids.wal")).unwrap();
    let a = engine.create_user("A".into(), "a@x.io".into()).await.unwrap();
    let b = engine.create_user("B".into(), "b@x.io".into()).await.unwrap();
    assert_eq!((a.id, b.id), (1, 2));
    assert_eq!(engine.list_users(), vec![a, b]);
}

#[tokio::test]
async fn duplicate_email_rejected_ignoring_case() {
    let engine = Engine::new(test_wal_path("dup_email.wal")).unwrap();
    assert_ok!(engine.create_user("A".into(), "same@x.io".into()).await);
    let err = assert_err!(engine.create_user("B".into(), "SAME@x.io".into()).await);
    assert!(matches!(err, EngineError::AlreadyExists { kind: EntityKind::User, .. }));
}

#[tokio::test]
async fn user_input_validated() {
    let engine = Engine::new(test_wal_path("user_input.wal")).unwrap();
    let err = assert_err!(engine.create_user("  ".into(), "a@x.io".into()).await);
    assert!(matches!(err, EngineError::Validation(_)));
    let err = assert_err!(engine.create_user("A".into(), "no-at-sign".into()).await);
    assert!(matches!(err, EngineError::Validation(_)));
}

#[tokio::test]
async fn update_user_keeps_unset_fields() {
    let f = fixture("update_user.wal").await;
    let updated = f.engine.update_user(f.booker, Some("Bob".into()), None).await.unwrap();
    assert_eq!(updated.name, "Bob");
    assert_eq!(updated.email, "boris@example.com");

    // Own email again is fine, someone else's is not
    assert_ok!(f.engine.update_user(f.booker, None, Some("Boris@Example.com".into())).await);
    let err = assert_err!(f.engine.update_user(f.booker, None, Some("olga@example.com".into())).await);
    assert!(matches!(err, EngineError::AlreadyExists { .. }));

    let err = assert_err!(f.engine.update_user(99, Some("Ghost".into()), None).await);
    assert!(is_not_found(&err, EntityKind::User, NotFoundReason::Missing));
}

#[tokio::test]
async fn changed_email_frees_the_old_one() {
    let f = fixture("email_swap.wal").await;
    assert_ok!(f.engine.update_user(f.booker, None, Some("b2@example.com".into())).await);
    assert_ok!(f.engine.create_user("New".into(), "boris@example.com".into()).await);
}

// ── Items ────────────────────────────────────────────────

#[tokio::test]
async fn create_item_checks_owner_and_request() {
    let engine = Engine::new(test_wal_path("create_item.wal")).unwrap();
    let err = assert_err!(engine.create_item(7, "Saw".into(), "Hand saw".into(), true, None).await);
    assert!(is_not_found(&err, EntityKind::User, NotFoundReason::Missing));

    let user = engine.create_user("A".into(), "a@x.io".into()).await.unwrap().id;
    let err = assert_err!(engine.create_item(user, "Saw".into(), "Hand saw".into(), true, Some(5)).await);
    assert!(is_not_found(&err, EntityKind::Request, NotFoundReason::Missing));
}

#[tokio::test]
async fn only_owner_updates_item() {
    let f = fixture("update_item.wal").await;
    let err = assert_err!(
        f.engine
            .update_item(f.booker, f.item, Some("Mine now".into()), None, None)
            .await
    );
    assert!(is_not_found(&err, EntityKind::Item, NotFoundReason::NotOwner));

    let item = f.engine.update_item(f.owner, f.item, None, None, Some(false)).await.unwrap();
    assert!(!item.available);
    assert_eq!(item.name, "Drill");
    assert_eq!(item.owner_id, f.owner);
}

#[tokio::test]
async fn search_matches_available_items_ignoring_case() {
    let f = fixture("search.wal").await;
    let hidden = f
        .engine
        .create_item(f.owner, "Drill press".into(), "Bench".into(), false, None)
        .await
        .unwrap();
    let ladder = f
        .engine
        .create_item(f.owner, "Ladder".into(), "Fits any DRILL job".into(), true, None)
        .await
        .unwrap();

    let hits = f.engine.search_items("dRiLl", all()).await.unwrap();
    let hit_ids: Vec<Id> = hits.iter().map(|i| i.id).collect();
    assert_eq!(hit_ids, vec![f.item, ladder.id]);
    assert!(!hit_ids.contains(&hidden.id));

    assert!(f.engine.search_items("   ", all()).await.unwrap().is_empty());
    assert_eq!(f.engine.search_items("drill", page(1, 1)).await.unwrap().len(), 1);
}

// ── Booking lifecycle ────────────────────────────────────

#[tokio::test]
async fn booking_lifecycle_scenario() {
    let f = fixture("lifecycle.wal").await;
    let now = now_ms();

    let booking = f
        .engine
        .create_booking(f.booker, f.item, now + D, now + 2 * D)
        .await
        .unwrap();
    assert_eq!(booking.status, BookingStatus::Waiting);
    assert_eq!(booking.booker_id, f.booker);
    assert_eq!(booking.item_name, "Drill");

    let approved = f.engine.process_booking(f.owner, booking.id, true).await.unwrap();
    assert_eq!(approved.status, BookingStatus::Approved);

    for approve in [true, false] {
        let err = assert_err!(f.engine.process_booking(f.owner, booking.id, approve).await);
        assert!(matches!(
            err,
            EngineError::StatusAlreadyProcessed {
                status: BookingStatus::Approved
            }
        ));
    }

    assert_ok!(f.engine.get_booking(f.booker, booking.id).await);
    assert_ok!(f.engine.get_booking(f.owner, booking.id).await);
    let err = assert_err!(f.engine.get_booking(f.other, booking.id).await);
    assert!(is_not_found(&err, EntityKind::Booking, NotFoundReason::NotOwnerOrBooker));
}

#[tokio::test]
async fn rejection_is_terminal_too() {
    let f = fixture("reject.wal").await;
    let now = now_ms();
    let b = f.engine.create_booking(f.booker, f.item, now + D, now + 2 * D).await.unwrap();
    let rejected = f.engine.process_booking(f.owner, b.id, false).await.unwrap();
    assert_eq!(rejected.status, BookingStatus::Rejected);
    let err = assert_err!(f.engine.process_booking(f.owner, b.id, true).await);
    assert!(matches!(
        err,
        EngineError::StatusAlreadyProcessed {
            status: BookingStatus::Rejected
        }
    ));
}

#[tokio::test]
async fn create_booking_check_order() {
    let f = fixture("create_checks.wal").await;
    let now = now_ms();

    let err = assert_err!(f.engine.create_booking(99, f.item, now + D, now + 2 * D).await);
    assert!(is_not_found(&err, EntityKind::User, NotFoundReason::Missing));

    let err = assert_err!(f.engine.create_booking(f.booker, 99, now + D, now + 2 * D).await);
    assert!(is_not_found(&err, EntityKind::Item, NotFoundReason::Missing));

    // Owner with a bad range hits the range check first
    let err = assert_err!(f.engine.create_booking(f.owner, f.item, now + 2 * D, now + D).await);
    assert!(matches!(err, EngineError::Validation(_)));

    let err = assert_err!(f.engine.create_booking(f.owner, f.item, now + D, now + 2 * D).await);
    assert!(is_not_found(&err, EntityKind::Item, NotFoundReason::OwnItem));

    // Unavailable wins over a bad range
    f.engine.update_item(f.owner, f.item, None, None, Some(false)).await.unwrap();
    let err = assert_err!(f.engine.create_booking(f.booker, f.item, now + 2 * D, now + D).await);
    assert!(matches!(err, EngineError::NotAvailable { item_id } if item_id == f.item));
}

#[tokio::test]
async fn equal_or_inverted_ranges_rejected() {
    let f = fixture("ranges.wal").await;
    let now = now_ms();
    for (start, end) in [(now + D, now + D), (now + 2 * D, now + D)] {
        let err = assert_err!(f.engine.create_booking(f.booker, f.item, start, end).await);
        assert!(matches!(err, EngineError::Validation(_)));
    }
}

#[tokio::test]
async fn availability_not_rechecked_on_approval() {
    let f = fixture("no_recheck.wal").await;
    let now = now_ms();
    let b = f.engine.create_booking(f.booker, f.item, now + D, now + 2 * D).await.unwrap();
    f.engine.update_item(f.owner, f.item, None, None, Some(false)).await.unwrap();
    let approved = f.engine.process_booking(f.owner, b.id, true).await.unwrap();
    assert_eq!(approved.status, BookingStatus::Approved);
}

#[tokio::test]
async fn only_owner_processes() {
    let f = fixture("process_auth.wal").await;
    let now = now_ms();
    let b = f.engine.create_booking(f.booker, f.item, now + D, now + 2 * D).await.unwrap();

    for actor in [f.booker, f.other] {
        let err = assert_err!(f.engine.process_booking(actor, b.id, true).await);
        assert!(is_not_found(&err, EntityKind::Booking, NotFoundReason::NotOwner));
    }
    let err = assert_err!(f.engine.process_booking(f.owner, 404, true).await);
    assert!(is_not_found(&err, EntityKind::Booking, NotFoundReason::Missing));

    // Still WAITING after the refused attempts
    let seen = f.engine.get_booking(f.booker, b.id).await.unwrap();
    assert_eq!(seen.status, BookingStatus::Waiting);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_decisions_have_one_winner() {
    let f = fixture("race.wal").await;
    let now = now_ms();
    let b = f.engine.create_booking(f.booker, f.item, now + D, now + 2 * D).await.unwrap();
    let engine = Arc::new(f.engine);

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let engine = engine.clone();
            tokio::spawn(async move { engine.process_booking(f.owner, b.id, i % 2 == 0).await })
        })
        .collect();

    let mut wins = 0;
    for h in handles {
        match h.await.unwrap() {
            Ok(_) => wins += 1,
            Err(EngineError::StatusAlreadyProcessed { .. }) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(wins, 1);
}

// ── Listings ─────────────────────────────────────────────

#[tokio::test]
async fn unknown_state_is_state_validation() {
    let f = fixture("bad_state.wal").await;
    for view in [BookingView::Booker, BookingView::Owner] {
        let err = assert_err!(
            f.engine
                .list_bookings(f.booker, view, "UNSUPPORTED_STATUS", all(), &[])
                .await
        );
        assert_eq!(err.to_string(), "Unknown state: UNSUPPORTED_STATUS");
    }
    let err = assert_err!(f.engine.list_bookings(99, BookingView::Booker, "ALL", all(), &[]).await);
    assert!(is_not_found(&err, EntityKind::User, NotFoundReason::Missing));
}

#[tokio::test]
async fn all_is_union_of_time_windows() {
    let f = fixture("union.wal").await;
    let now = now_ms();
    let spans = [
        (now - 5 * D, now - 4 * D),
        (now - 3 * D, now - 2 * D),
        (now - D, now + D),
        (now - 2 * D, now + 3 * D),
        (now + D, now + 2 * D),
        (now + 4 * D, now + 5 * D),
    ];
    let mut created = Vec::new();
    for (start, end) in spans {
        created.push(f.engine.create_booking(f.booker, f.item, start, end).await.unwrap().id);
    }
    f.engine.process_booking(f.owner, created[0], true).await.unwrap();
    f.engine.process_booking(f.owner, created[2], false).await.unwrap();
    f.engine.process_booking(f.owner, created[4], true).await.unwrap();

    for view in [BookingView::Booker, BookingView::Owner] {
        let actor = if view == BookingView::Booker { f.booker } else { f.owner };
        let list = |state: &'static str| {
            let engine = &f.engine;
            async move { engine.list_bookings(actor, view, state, all(), &[]).await.unwrap() }
        };

        let every: HashSet<Id> = ids(&list("ALL").await).into_iter().collect();
        assert_eq!(every, created.iter().copied().collect());

        let mut windows = Vec::new();
        for state in ["PAST", "CURRENT", "FUTURE"] {
            windows.extend(ids(&list(state).await));
        }
        assert_eq!(windows.len(), every.len(), "time windows overlap or miss bookings");
        assert_eq!(windows.into_iter().collect::<HashSet<_>>(), every);

        assert_eq!(ids(&list("PAST").await).len(), 2);
        assert_eq!(ids(&list("CURRENT").await).len(), 2);
        assert_eq!(ids(&list("FUTURE").await).len(), 2);
        assert_eq!(ids(&list("WAITING").await).len(), 3);
        assert_eq!(ids(&list("REJECTED").await), vec![created[2]]);
    }
}

#[tokio::test]
async fn listings_are_scoped_by_view() {
    let f = fixture("views.wal").await;
    let now = now_ms();
    let mine = f.engine.create_booking(f.booker, f.item, now + D, now + 2 * D).await.unwrap();
    let theirs = f.engine.create_booking(f.other, f.item, now + D, now + 2 * D).await.unwrap();

    let booked = f.engine.list_bookings(f.booker, BookingView::Booker, "ALL", all(), &[]).await.unwrap();
    assert_eq!(ids(&booked), vec![mine.id]);

    let owned = f.engine.list_bookings(f.owner, BookingView::Owner, "ALL", all(), &[]).await.unwrap();
    assert_eq!(owned.len(), 2);
    assert!(ids(&owned).contains(&theirs.id));

    // Bookers own nothing
    let none = f.engine.list_bookings(f.booker, BookingView::Owner, "ALL", all(), &[]).await.unwrap();
    assert!(none.is_empty());
}

#[tokio::test]
async fn pages_partition_sorted_listing() {
    let f = fixture("pages.wal").await;
    let now = now_ms();
    for i in 0..15 {
        f.engine
            .create_booking(f.booker, f.item, now + (i + 1) * D, now + (i + 2) * D)
            .await
            .unwrap();
    }
    let sort = parse_sort(&["start;DESC"]);
    let full = f
        .engine
        .list_bookings(f.booker, BookingView::Booker, "ALL", all(), &sort)
        .await
        .unwrap();
    assert!(full.windows(2).all(|w| w[0].start >= w[1].start));

    let first = f
        .engine
        .list_bookings(f.booker, BookingView::Booker, "ALL", page(0, 10), &sort)
        .await
        .unwrap();
    let second = f
        .engine
        .list_bookings(f.booker, BookingView::Booker, "ALL", page(10, 10), &sort)
        .await
        .unwrap();
    assert_eq!((first.len(), second.len()), (10, 5));
    let joined: Vec<BookingInfo> = first.into_iter().chain(second).collect();
    assert_eq!(joined, full);

    // Default order is start;DESC as well
    let default = f
        .engine
        .list_bookings(f.booker, BookingView::Booker, "ALL", all(), &[])
        .await
        .unwrap();
    assert_eq!(default, full);
}

#[tokio::test]
async fn bad_sort_and_window_rejected() {
    let f = fixture("bad_sort.wal").await;
    let err = assert_err!(
        f.engine
            .list_bookings(f.booker, BookingView::Booker, "ALL", all(), &parse_sort(&["price;ASC"]))
            .await
    );
    assert!(matches!(err, EngineError::Validation(_)));

    let err = assert_err!(
        f.engine
            .list_bookings(f.booker, BookingView::Booker, "ALL", page(0, 5000), &[])
            .await
    );
    assert!(matches!(err, EngineError::LimitExceeded(_)));
}

// ── Projection and comments ──────────────────────────────

#[tokio::test]
async fn projection_shows_last_and_next_to_owner_only() {
    let f = fixture("projection.wal").await;
    let now = now_ms();
    let last = f.engine.create_booking(f.booker, f.item, now - 3 * D, now - 2 * D).await.unwrap();
    let next = f.engine.create_booking(f.booker, f.item, now + D, now + 2 * D).await.unwrap();
    f.engine.create_booking(f.other, f.item, now + 5 * D, now + 6 * D).await.unwrap();

    let seen = f.engine.get_item(f.owner, f.item).await.unwrap();
    assert_eq!(seen.last_booking.map(|b| b.id), Some(last.id));
    assert_eq!(seen.next_booking.map(|b| b.id), Some(next.id));
    assert_eq!(seen.next_booking.map(|b| b.booker_id), Some(f.booker));

    let stranger = f.engine.get_item(f.other, f.item).await.unwrap();
    assert!(stranger.last_booking.is_none());
    assert!(stranger.next_booking.is_none());
    assert_eq!(stranger.item, seen.item);

    let err = assert_err!(f.engine.get_item(f.owner, 404).await);
    assert!(is_not_found(&err, EntityKind::Item, NotFoundReason::Missing));
}

#[tokio::test]
async fn owner_listing_always_projects() {
    let f = fixture("owner_items.wal").await;
    let now = now_ms();
    let second = f
        .engine
        .create_item(f.owner, "Axe".into(), "Splitting axe".into(), true, None)
        .await
        .unwrap();
    let b = f.engine.create_booking(f.booker, second.id, now + D, now + 2 * D).await.unwrap();

    let items = f.engine.list_owner_items(f.owner, PageRequest::default(), &[]).await.unwrap();
    assert_eq!(items.iter().map(|p| p.item.id).collect::<Vec<_>>(), vec![f.item, second.id]);
    assert!(items[0].next_booking.is_none());
    assert_eq!(items[1].next_booking.map(|r| r.id), Some(b.id));
    assert!(items.iter().all(|p| p.comments.is_empty()));

    let by_name = f
        .engine
        .list_owner_items(f.owner, PageRequest::default(), &parse_sort(&["name;ASC"]))
        .await
        .unwrap();
    assert_eq!(by_name[0].item.id, second.id);
}

#[tokio::test]
async fn projection_needs_no_registered_viewer() {
    let f = fixture("anonymous_viewer.wal").await;
    let now = now_ms();
    f.engine.create_booking(f.booker, f.item, now + D, now + 2 * D).await.unwrap();

    let seen = assert_ok!(f.engine.get_item(4242, f.item).await);
    assert_eq!(seen.item.id, f.item);
    assert!(seen.next_booking.is_none());

    let listed = assert_ok!(f.engine.list_owner_items(4242, PageRequest::default(), &[]).await);
    assert!(listed.is_empty());
}

#[tokio::test]
async fn comment_needs_started_booking() {
    let f = fixture("comment_rule.wal").await;
    let now = now_ms();

    let err = assert_err!(f.engine.add_comment(f.booker, f.item, "Great".into()).await);
    assert!(matches!(err, EngineError::Validation(_)));

    // A future booking does not count
    f.engine.create_booking(f.booker, f.item, now + D, now + 2 * D).await.unwrap();
    let err = assert_err!(f.engine.add_comment(f.booker, f.item, "Great".into()).await);
    assert!(matches!(err, EngineError::Validation(_)));

    // A started booking does, whatever its status
    let started = f.engine.create_booking(f.booker, f.item, now - D, now + D).await.unwrap();
    f.engine.process_booking(f.owner, started.id, false).await.unwrap();
    let comment = f.engine.add_comment(f.booker, f.item, "Great".into()).await.unwrap();
    assert_eq!(comment.author_name, "Boris");
    assert!(comment.created >= now);

    let err = assert_err!(f.engine.add_comment(99, f.item, "Hi".into()).await);
    assert!(is_not_found(&err, EntityKind::User, NotFoundReason::Missing));

    // Nobody has booked an item that does not exist
    let err = assert_err!(f.engine.add_comment(f.booker, 9999, "Hi".into()).await);
    assert!(matches!(err, EngineError::Validation(_)));

    let projection = f.engine.get_item(f.other, f.item).await.unwrap();
    assert_eq!(projection.comments, vec![comment]);
}

// ── Item requests ────────────────────────────────────────

#[tokio::test]
async fn requests_listed_with_answering_items() {
    let f = fixture("requests.wal").await;
    let wanted = f.engine.create_request(f.booker, "Need a tent".into()).await.unwrap();
    let answer = f
        .engine
        .create_item(f.owner, "Tent".into(), "4 person".into(), true, Some(wanted.id))
        .await
        .unwrap();

    let own = f.engine.list_own_requests(f.booker, &[]).await.unwrap();
    assert_eq!(own.len(), 1);
    assert_eq!(own[0].items, vec![answer.clone()]);

    let fetched = f.engine.get_request(f.other, wanted.id).await.unwrap();
    assert_eq!(fetched.request, wanted);
    let err = assert_err!(f.engine.get_request(f.other, 404).await);
    assert!(is_not_found(&err, EntityKind::Request, NotFoundReason::Missing));
}

#[tokio::test]
async fn other_requests_filtered_before_paging() {
    let f = fixture("other_requests.wal").await;
    for i in 0..3 {
        f.engine.create_request(f.owner, format!("mine {i}")).await.unwrap();
    }
    for i in 0..4 {
        f.engine.create_request(f.booker, format!("theirs {i}")).await.unwrap();
    }
    let sort = parse_sort(&["id;ASC"]);
    let first = f.engine.list_other_requests(f.owner, page(0, 2), &sort).await.unwrap();
    let second = f.engine.list_other_requests(f.owner, page(2, 2), &sort).await.unwrap();
    assert_eq!(first.len(), 2);
    assert_eq!(second.len(), 2);
    assert!(first.iter().chain(&second).all(|r| r.request.requestor_id == f.booker));
}

// ── Durability ───────────────────────────────────────────

async fn assert_restored(engine: &Engine, f_owner: Id, f_booker: Id, item: Id, booking: Id) {
    let b = engine.get_booking(f_booker, booking).await.unwrap();
    assert_eq!(b.status, BookingStatus::Approved);
    let projection = engine.get_item(f_owner, item).await.unwrap();
    assert_eq!(projection.comments.len(), 1);
    assert_eq!(projection.item.name, "Hammer drill");
    // Counters resume past replayed ids
    let u = engine.create_user("Late".into(), "late@example.com".into()).await.unwrap();
    assert_eq!(u.id, 4);
}

async fn seed_history(f: &Fixture) -> Id {
    let now = now_ms();
    let b = f.engine.create_booking(f.booker, f.item, now - D, now + D).await.unwrap();
    f.engine.process_booking(f.owner, b.id, true).await.unwrap();
    f.engine.add_comment(f.booker, f.item, "Solid".into()).await.unwrap();
    f.engine
        .update_item(f.owner, f.item, Some("Hammer drill".into()), None, None)
        .await
        .unwrap();
    b.id
}

#[tokio::test]
async fn state_survives_restart() {
    let path = test_wal_path("restart.wal");
    let f = fixture("restart.wal").await;
    let booking = seed_history(&f).await;
    let (owner, booker, item) = (f.owner, f.booker, f.item);
    drop(f);

    let engine = Engine::new(path).unwrap();
    assert_restored(&engine, owner, booker, item, booking).await;
}

#[tokio::test]
async fn compaction_preserves_state() {
    let path = test_wal_path("compact.wal");
    let f = fixture("compact.wal").await;
    let booking = seed_history(&f).await;
    assert!(f.engine.wal_appends_since_compact().await > 0);

    f.engine.compact_wal().await.unwrap();
    assert_eq!(f.engine.wal_appends_since_compact().await, 0);
    let (owner, booker, item) = (f.owner, f.booker, f.item);
    drop(f);

    let engine = Engine::new(path).unwrap();
    assert_restored(&engine, owner, booker, item, booking).await;
}
