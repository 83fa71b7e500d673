use super::*;
use super::conflict::{find_conflict, validate_span};
use super::mutations::is_valid_email;
use crate::limits::*;

const D: Ms = 86_400_000; // 1 day in ms
const T0: Ms = 1_772_323_200_000; // 2026-03-01T00:00:00Z

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("fleetbook_test_engine");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

fn corolla() -> VehicleSpec {
    VehicleSpec {
        make: "Toyota".into(),
        model: "Corolla".into(),
        year: Some(2020),
        available: true,
    }
}

fn focus() -> VehicleSpec {
    VehicleSpec {
        make: "Ford".into(),
        model: "Focus".into(),
        year: Some(2019),
        available: true,
    }
}

/// Engine with one vehicle and one user.
async fn fixture(name: &str) -> (Engine, Ulid, Ulid) {
    let engine = Engine::new(test_wal_path(name)).unwrap();
    let vid = Ulid::new();
    engine.add_vehicle(vid, corolla()).await.unwrap();
    let uid = Ulid::new();
    engine
        .create_user(uid, "user@rental.com", None, Role::User)
        .await
        .unwrap();
    (engine, vid, uid)
}

fn request(vehicle_id: Ulid, user_id: Ulid, start: Ms, end: Ms, status: ReservationStatus) -> NewReservation {
    NewReservation {
        vehicle_id,
        user_id,
        start,
        end,
        status,
    }
}

// ── Pure helpers ─────────────────────────────────────────

#[test]
fn validate_span_rules() {
    assert!(validate_span(T0, T0 + D).is_ok());
    assert!(matches!(validate_span(T0, T0), Err(EngineError::Invalid(_))));
    assert!(matches!(validate_span(T0 + D, T0), Err(EngineError::Invalid(_))));
    assert!(matches!(validate_span(-1, T0), Err(EngineError::LimitExceeded(_))));
    assert!(matches!(
        validate_span(T0, T0 + MAX_RESERVATION_MS + 1),
        Err(EngineError::LimitExceeded(_))
    ));
}

#[test]
fn find_conflict_only_counts_approved() {
    let mut vs = VehicleState::new(Ulid::new(), "Ford".into(), "Focus".into(), None, true);
    let pending = Ulid::new();
    let approved = Ulid::new();
    vs.insert_reservation(Reservation {
        id: pending,
        user_id: Ulid::new(),
        span: Span::new(0, 100),
        status: ReservationStatus::Pending,
    });
    vs.insert_reservation(Reservation {
        id: approved,
        user_id: Ulid::new(),
        span: Span::new(50, 150),
        status: ReservationStatus::Approved,
    });

    assert_eq!(find_conflict(&vs, &Span::new(0, 40), None), None);
    assert_eq!(find_conflict(&vs, &Span::new(0, 60), None), Some(approved));
    assert_eq!(find_conflict(&vs, &Span::new(0, 60), Some(approved)), None);
    assert_eq!(find_conflict(&vs, &Span::new(150, 200), None), None);
}

#[test]
fn email_shape() {
    assert!(is_valid_email("a@b.c"));
    assert!(is_valid_email("first.last@sub.example.com"));
    assert!(!is_valid_email("no-at-sign.com"));
    assert!(!is_valid_email("a@b"));
    assert!(!is_valid_email("a@b."));
    assert!(is_valid_email("a@b.c."));
    assert!(!is_valid_email("a@.b"));
    assert!(!is_valid_email("@b.c"));
    assert!(!is_valid_email("a@@b.c"));
    assert!(!is_valid_email("a b@c.d"));
}

// ── Vehicles ─────────────────────────────────────────────

#[tokio::test]
async fn engine_add_and_get_vehicle() {
    let engine = Engine::new(test_wal_path("add_vehicle.wal")).unwrap();
    let id = Ulid::new();
    let info = engine.add_vehicle(id, corolla()).await.unwrap();
    assert_eq!(info.make, "Toyota");
    assert_eq!(engine.get_vehicle(id).await, Some(info));
    assert_eq!(engine.get_vehicle(Ulid::new()).await, None);
}

#[tokio::test]
async fn engine_vehicle_validation() {
    let engine = Engine::new(test_wal_path("vehicle_validation.wal")).unwrap();
    let mut spec = corolla();
    spec.make = "   ".into();
    assert!(matches!(
        engine.add_vehicle(Ulid::new(), spec).await,
        Err(EngineError::Invalid("make is required"))
    ));

    for year in [1900, 2100, 1800] {
        let mut spec = corolla();
        spec.year = Some(year);
        assert!(matches!(
            engine.add_vehicle(Ulid::new(), spec).await,
            Err(EngineError::Invalid(_))
        ));
    }

    let mut spec = corolla();
    spec.model = "x".repeat(MAX_TEXT_LEN + 1);
    assert!(matches!(
        engine.add_vehicle(Ulid::new(), spec).await,
        Err(EngineError::LimitExceeded(_))
    ));

    let mut spec = corolla();
    spec.year = None;
    assert!(engine.add_vehicle(Ulid::new(), spec).await.is_ok());
    assert_eq!(engine.list_vehicles().await.len(), 1);
}

#[tokio::test]
async fn engine_duplicate_vehicle_rejected() {
    let engine = Engine::new(test_wal_path("dup_vehicle.wal")).unwrap();
    let id = Ulid::new();
    engine.add_vehicle(id, corolla()).await.unwrap();
    assert!(matches!(
        engine.add_vehicle(id, focus()).await,
        Err(EngineError::AlreadyExists(_))
    ));
}

#[tokio::test]
async fn engine_list_vehicles_newest_first() {
    let engine = Engine::new(test_wal_path("list_vehicles.wal")).unwrap();
    let first = Ulid::new();
    engine.add_vehicle(first, corolla()).await.unwrap();
    std::thread::sleep(std::time::Duration::from_millis(2));
    let second = Ulid::new();
    engine.add_vehicle(second, focus()).await.unwrap();

    let ids: Vec<Ulid> = engine.list_vehicles().await.iter().map(|v| v.id).collect();
    assert_eq!(ids, vec![second, first]);
}

#[tokio::test]
async fn engine_update_vehicle_partial() {
    let engine = Engine::new(test_wal_path("update_vehicle.wal")).unwrap();
    let id = Ulid::new();
    engine.add_vehicle(id, corolla()).await.unwrap();

    let unchanged = engine.update_vehicle(id, VehiclePatch::default()).await.unwrap();
    assert_eq!(unchanged.model, "Corolla");

    let updated = engine
        .update_vehicle(
            id,
            VehiclePatch {
                available: Some(false),
                year: Some(2021),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.make, "Toyota");
    assert_eq!(updated.year, Some(2021));
    assert!(!updated.available);

    assert!(matches!(
        engine
            .update_vehicle(
                id,
                VehiclePatch {
                    make: Some(String::new()),
                    ..Default::default()
                }
            )
            .await,
        Err(EngineError::Invalid(_))
    ));
    assert!(matches!(
        engine.update_vehicle(Ulid::new(), VehiclePatch::default()).await,
        Err(EngineError::NotFound(_))
    ));
}

#[tokio::test]
async fn engine_delete_vehicle_cascades_reservations() {
    let (engine, vid, uid) = fixture("delete_vehicle.wal").await;
    let rid = Ulid::new();
    engine
        .create_reservation(rid, request(vid, uid, T0, T0 + D, ReservationStatus::Approved))
        .await
        .unwrap();

    engine.delete_vehicle(vid).await.unwrap();
    assert!(engine.get_vehicle(vid).await.is_none());
    assert!(engine.get_reservation(rid).await.is_none());
    assert!(engine.list_reservations(ReservationFilter::default()).await.is_empty());
    assert!(matches!(engine.delete_reservation(rid).await, Err(EngineError::NotFound(_))));
    assert!(matches!(engine.delete_vehicle(vid).await, Err(EngineError::NotFound(_))));
}

// ── Users ────────────────────────────────────────────────

#[tokio::test]
async fn engine_create_user_normalizes_email() {
    let engine = Engine::new(test_wal_path("create_user.wal")).unwrap();
    let id = Ulid::new();
    let info = engine
        .create_user(id, "  Admin@Rental.COM ", Some("hash".into()), Role::Admin)
        .await
        .unwrap();
    assert_eq!(info.email, "admin@rental.com");

    let found = engine.find_user_by_email("ADMIN@rental.com").await.unwrap();
    assert_eq!(found.id, id);
    assert_eq!(found.password_hash.as_deref(), Some("hash"));
    assert_eq!(engine.get_user(id).await.map(|u| u.role), Some(Role::Admin));
    assert!(engine.find_user_by_email("nobody@rental.com").await.is_none());
}

#[tokio::test]
async fn engine_duplicate_email_rejected() {
    let engine = Engine::new(test_wal_path("dup_email.wal")).unwrap();
    engine
        .create_user(Ulid::new(), "user@rental.com", None, Role::User)
        .await
        .unwrap();
    assert!(matches!(
        engine
            .create_user(Ulid::new(), "USER@rental.com", None, Role::Admin)
            .await,
        Err(EngineError::DuplicateEmail(_))
    ));
    assert!(matches!(
        engine.create_user(Ulid::new(), "not-an-email", None, Role::User).await,
        Err(EngineError::Invalid(_))
    ));
    assert_eq!(engine.list_users().await.len(), 1);
}

#[tokio::test]
async fn engine_list_users_by_email() {
    let engine = Engine::new(test_wal_path("list_users.wal")).unwrap();
    for email in ["zed@rental.com", "amy@rental.com", "max@rental.com"] {
        engine.create_user(Ulid::new(), email, None, Role::User).await.unwrap();
    }
    let emails: Vec<String> = engine.list_users().await.into_iter().map(|u| u.email).collect();
    assert_eq!(emails, vec!["amy@rental.com", "max@rental.com", "zed@rental.com"]);
}

// ── Reservations ─────────────────────────────────────────

#[tokio::test]
async fn engine_create_reservation() {
    let (engine, vid, uid) = fixture("create_reservation.wal").await;
    let rid = Ulid::new();
    let info = engine
        .create_reservation(rid, request(vid, uid, T0, T0 + D, ReservationStatus::Pending))
        .await
        .unwrap();
    assert_eq!(info.id, rid);
    assert_eq!(info.vehicle_id, vid);
    assert_eq!(info.status, ReservationStatus::Pending);
    assert_eq!(engine.get_reservation(rid).await, Some(info));
}

#[tokio::test]
async fn engine_reservation_unknown_vehicle_or_user() {
    let (engine, vid, uid) = fixture("reservation_unknown.wal").await;
    let missing = Ulid::new();
    assert!(matches!(
        engine
            .create_reservation(Ulid::new(), request(missing, uid, T0, T0 + D, ReservationStatus::Pending))
            .await,
        Err(EngineError::NotFound(id)) if id == missing
    ));
    assert!(matches!(
        engine
            .create_reservation(Ulid::new(), request(vid, missing, T0, T0 + D, ReservationStatus::Pending))
            .await,
        Err(EngineError::NotFound(id)) if id == missing
    ));
}

#[tokio::test]
async fn engine_reservation_bad_span_writes_nothing() {
    let (engine, vid, uid) = fixture("reservation_bad_span.wal").await;
    let before = engine.wal_appends_since_compact().await;
    assert!(matches!(
        engine
            .create_reservation(Ulid::new(), request(vid, uid, T0 + D, T0, ReservationStatus::Pending))
            .await,
        Err(EngineError::Invalid(_))
    ));
    assert_eq!(engine.wal_appends_since_compact().await, before);
}

#[tokio::test]
async fn engine_overlap_with_approved_conflicts() {
    let (engine, vid, uid) = fixture("approved_conflict.wal").await;
    let existing = Ulid::new();
    engine
        .create_reservation(existing, request(vid, uid, T0, T0 + 3 * D, ReservationStatus::Approved))
        .await
        .unwrap();

    let result = engine
        .create_reservation(
            Ulid::new(),
            request(vid, uid, T0 + D, T0 + 2 * D, ReservationStatus::Pending),
        )
        .await;
    assert!(matches!(result, Err(EngineError::Conflict(id)) if id == existing));
}

#[tokio::test]
async fn engine_overlap_with_pending_allowed() {
    let (engine, vid, uid) = fixture("pending_overlap.wal").await;
    engine
        .create_reservation(Ulid::new(), request(vid, uid, T0, T0 + 3 * D, ReservationStatus::Pending))
        .await
        .unwrap();
    engine
        .create_reservation(Ulid::new(), request(vid, uid, T0 + D, T0 + 2 * D, ReservationStatus::Pending))
        .await
        .unwrap();
    assert_eq!(
        engine
            .list_reservations(ReservationFilter {
                vehicle_id: Some(vid),
                ..Default::default()
            })
            .await
            .len(),
        2
    );
}

#[tokio::test]
async fn engine_adjacent_reservations_no_conflict() {
    let (engine, vid, uid) = fixture("adjacent.wal").await;
    engine
        .create_reservation(Ulid::new(), request(vid, uid, T0, T0 + D, ReservationStatus::Approved))
        .await
        .unwrap();
    engine
        .create_reservation(Ulid::new(), request(vid, uid, T0 + D, T0 + 2 * D, ReservationStatus::Approved))
        .await
        .unwrap();
}

#[tokio::test]
async fn engine_other_vehicle_never_conflicts() {
    let (engine, vid, uid) = fixture("other_vehicle.wal").await;
    let other = Ulid::new();
    engine.add_vehicle(other, focus()).await.unwrap();
    engine
        .create_reservation(Ulid::new(), request(vid, uid, T0, T0 + D, ReservationStatus::Approved))
        .await
        .unwrap();
    engine
        .create_reservation(Ulid::new(), request(other, uid, T0, T0 + D, ReservationStatus::Approved))
        .await
        .unwrap();
}

#[tokio::test]
async fn engine_approve_rechecks_conflicts() {
    let (engine, vid, uid) = fixture("approve_recheck.wal").await;
    let a = Ulid::new();
    let b = Ulid::new();
    engine
        .create_reservation(a, request(vid, uid, T0, T0 + 2 * D, ReservationStatus::Pending))
        .await
        .unwrap();
    engine
        .create_reservation(b, request(vid, uid, T0 + D, T0 + 3 * D, ReservationStatus::Pending))
        .await
        .unwrap();

    let approved = engine
        .set_reservation_status(a, ReservationStatus::Approved)
        .await
        .unwrap();
    assert_eq!(approved.status, ReservationStatus::Approved);
    // Re-approving itself is not a conflict.
    engine
        .set_reservation_status(a, ReservationStatus::Approved)
        .await
        .unwrap();

    assert!(matches!(
        engine.set_reservation_status(b, ReservationStatus::Approved).await,
        Err(EngineError::Conflict(id)) if id == a
    ));
    engine
        .set_reservation_status(b, ReservationStatus::Rejected)
        .await
        .unwrap();

    engine
        .set_reservation_status(a, ReservationStatus::Pending)
        .await
        .unwrap();
    engine
        .set_reservation_status(b, ReservationStatus::Approved)
        .await
        .unwrap();
    assert!(matches!(
        engine
            .set_reservation_status(Ulid::new(), ReservationStatus::Approved)
            .await,
        Err(EngineError::NotFound(_))
    ));
}

#[tokio::test]
async fn engine_edit_same_vehicle() {
    let (engine, vid, uid) = fixture("edit_same.wal").await;
    let a = Ulid::new();
    let b = Ulid::new();
    engine
        .create_reservation(a, request(vid, uid, T0, T0 + D, ReservationStatus::Approved))
        .await
        .unwrap();
    engine
        .create_reservation(b, request(vid, uid, T0 + 2 * D, T0 + 3 * D, ReservationStatus::Approved))
        .await
        .unwrap();

    // Extending `a` into `b` conflicts.
    let extend = ReservationEdit {
        end: Some(T0 + 2 * D + 1),
        ..Default::default()
    };
    assert!(matches!(
        engine.edit_reservation(a, extend).await,
        Err(EngineError::Conflict(id)) if id == b
    ));

    // Shifting `a` within its own window is fine.
    let shifted = engine
        .edit_reservation(
            a,
            ReservationEdit {
                start: Some(T0 + D / 2),
                end: Some(T0 + 2 * D),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!((shifted.from_ts, shifted.to_ts), (T0 + D / 2, T0 + 2 * D));

    // Inverting the span through a single field is invalid.
    assert!(matches!(
        engine
            .edit_reservation(
                a,
                ReservationEdit {
                    start: Some(T0 + 5 * D),
                    ..Default::default()
                }
            )
            .await,
        Err(EngineError::Invalid(_))
    ));
}

#[tokio::test]
async fn engine_edit_pending_overlap_allowed() {
    let (engine, vid, uid) = fixture("edit_pending.wal").await;
    let a = Ulid::new();
    let b = Ulid::new();
    engine
        .create_reservation(a, request(vid, uid, T0, T0 + D, ReservationStatus::Approved))
        .await
        .unwrap();
    engine
        .create_reservation(b, request(vid, uid, T0 + 2 * D, T0 + 3 * D, ReservationStatus::Pending))
        .await
        .unwrap();

    let edited = engine
        .edit_reservation(
            b,
            ReservationEdit {
                start: Some(T0),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(edited.status, ReservationStatus::Pending);

    // Approving it in the same edit is a conflict.
    assert!(matches!(
        engine
            .edit_reservation(
                b,
                ReservationEdit {
                    status: Some(ReservationStatus::Approved),
                    ..Default::default()
                }
            )
            .await,
        Err(EngineError::Conflict(id)) if id == a
    ));
}

#[tokio::test]
async fn engine_edit_moves_between_vehicles() {
    let (engine, vid, uid) = fixture("edit_move.wal").await;
    let other = Ulid::new();
    engine.add_vehicle(other, focus()).await.unwrap();

    let blocker = Ulid::new();
    engine
        .create_reservation(blocker, request(other, uid, T0, T0 + D, ReservationStatus::Approved))
        .await
        .unwrap();
    let rid = Ulid::new();
    engine
        .create_reservation(rid, request(vid, uid, T0, T0 + D, ReservationStatus::Approved))
        .await
        .unwrap();

    let onto_blocker = ReservationEdit {
        vehicle_id: Some(other),
        ..Default::default()
    };
    assert!(matches!(
        engine.edit_reservation(rid, onto_blocker).await,
        Err(EngineError::Conflict(id)) if id == blocker
    ));

    let moved = engine
        .edit_reservation(
            rid,
            ReservationEdit {
                vehicle_id: Some(other),
                start: Some(T0 + D),
                end: Some(T0 + 2 * D),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(moved.vehicle_id, other);
    assert_eq!(engine.vehicle_for_reservation(&rid), Some(other));
    assert!(
        engine
            .list_reservations(ReservationFilter {
                vehicle_id: Some(vid),
                ..Default::default()
            })
            .await
            .is_empty()
    );

    assert!(matches!(
        engine
            .edit_reservation(
                rid,
                ReservationEdit {
                    vehicle_id: Some(Ulid::new()),
                    ..Default::default()
                }
            )
            .await,
        Err(EngineError::NotFound(_))
    ));
}

#[tokio::test]
async fn engine_edit_unknown_user() {
    let (engine, vid, uid) = fixture("edit_user.wal").await;
    let rid = Ulid::new();
    engine
        .create_reservation(rid, request(vid, uid, T0, T0 + D, ReservationStatus::Pending))
        .await
        .unwrap();
    assert!(matches!(
        engine
            .edit_reservation(
                rid,
                ReservationEdit {
                    user_id: Some(Ulid::new()),
                    ..Default::default()
                }
            )
            .await,
        Err(EngineError::NotFound(_))
    ));
}

#[tokio::test]
async fn engine_delete_reservation() {
    let (engine, vid, uid) = fixture("delete_reservation.wal").await;
    let rid = Ulid::new();
    engine
        .create_reservation(rid, request(vid, uid, T0, T0 + D, ReservationStatus::Approved))
        .await
        .unwrap();
    assert_eq!(engine.delete_reservation(rid).await.unwrap(), vid);
    assert!(engine.get_reservation(rid).await.is_none());
    assert!(matches!(engine.delete_reservation(rid).await, Err(EngineError::NotFound(_))));

    // The freed slot can be approved again.
    engine
        .create_reservation(Ulid::new(), request(vid, uid, T0, T0 + D, ReservationStatus::Approved))
        .await
        .unwrap();
}

#[tokio::test]
async fn engine_has_conflict_probe() {
    let (engine, vid, uid) = fixture("has_conflict.wal").await;
    let rid = Ulid::new();
    engine
        .create_reservation(rid, request(vid, uid, T0, T0 + D, ReservationStatus::Approved))
        .await
        .unwrap();

    assert!(engine.has_conflict(vid, T0, T0 + 1, None).await.unwrap());
    assert!(!engine.has_conflict(vid, T0, T0 + 1, Some(rid)).await.unwrap());
    assert!(!engine.has_conflict(vid, T0 + D, T0 + 2 * D, None).await.unwrap());
    assert!(!engine.has_conflict(Ulid::new(), T0, T0 + D, None).await.unwrap());
    assert!(engine.has_conflict(vid, T0 + D, T0, None).await.is_err());
}

#[tokio::test]
async fn engine_list_filters_and_details() {
    let (engine, vid, uid) = fixture("list_filters.wal").await;
    let other_vehicle = Ulid::new();
    engine.add_vehicle(other_vehicle, focus()).await.unwrap();
    let other_user = Ulid::new();
    engine
        .create_user(other_user, "other@rental.com", None, Role::User)
        .await
        .unwrap();

    let r1 = Ulid::new();
    engine
        .create_reservation(r1, request(vid, uid, T0, T0 + D, ReservationStatus::Pending))
        .await
        .unwrap();
    std::thread::sleep(std::time::Duration::from_millis(2));
    let r2 = Ulid::new();
    engine
        .create_reservation(r2, request(other_vehicle, uid, T0, T0 + D, ReservationStatus::Pending))
        .await
        .unwrap();
    std::thread::sleep(std::time::Duration::from_millis(2));
    let r3 = Ulid::new();
    engine
        .create_reservation(r3, request(vid, other_user, T0 + D, T0 + 2 * D, ReservationStatus::Pending))
        .await
        .unwrap();

    let all: Vec<Ulid> = engine
        .list_reservations(ReservationFilter::default())
        .await
        .iter()
        .map(|r| r.id)
        .collect();
    assert_eq!(all, vec![r3, r2, r1]);

    let by_user: Vec<Ulid> = engine
        .list_reservations(ReservationFilter {
            user_id: Some(uid),
            ..Default::default()
        })
        .await
        .iter()
        .map(|r| r.id)
        .collect();
    assert_eq!(by_user, vec![r2, r1]);

    let details = engine
        .list_reservation_details(ReservationFilter {
            user_id: Some(uid),
            vehicle_id: Some(vid),
        })
        .await;
    assert_eq!(details.len(), 1);
    assert_eq!(details[0].id, r1);
    assert_eq!(details[0].vehicle_make.as_deref(), Some("Toyota"));
    assert_eq!(details[0].vehicle_year, Some(2020));
    assert_eq!(details[0].user_email.as_deref(), Some("user@rental.com"));
}

#[tokio::test]
async fn engine_concurrent_approvals_one_wins() {
    let (engine, vid, uid) = fixture("concurrent_approvals.wal").await;
    let engine = Arc::new(engine);

    let mut handles = Vec::new();
    for _ in 0..16 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            engine
                .create_reservation(Ulid::new(), request(vid, uid, T0, T0 + D, ReservationStatus::Approved))
                .await
        }));
    }
    let mut ok = 0;
    for h in handles {
        match h.await.unwrap() {
            Ok(_) => ok += 1,
            Err(EngineError::Conflict(_)) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(ok, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn engine_concurrent_moves_follow_the_reservation() {
    let (engine, vid, uid) = fixture("concurrent_moves.wal").await;
    let engine = Arc::new(engine);
    let target = Ulid::new();
    engine.add_vehicle(target, focus()).await.unwrap();
    let rid = Ulid::new();
    engine
        .create_reservation(rid, request(vid, uid, T0, T0 + D, ReservationStatus::Pending))
        .await
        .unwrap();

    // Losers read the old vehicle, then find the reservation already moved.
    let mut handles = Vec::new();
    for i in 0..8 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            let edit = ReservationEdit {
                vehicle_id: Some(target),
                end: Some(T0 + D + i * 3_600_000),
                ..Default::default()
            };
            engine.edit_reservation(rid, edit).await
        }));
    }
    for h in handles {
        let info = h.await.unwrap().unwrap();
        assert_eq!(info.vehicle_id, target);
    }
    assert_eq!(engine.vehicle_for_reservation(&rid), Some(target));
    assert!(engine.get_vehicle_state(&vid).unwrap().read().await.reservations.is_empty());
}

// ── Persistence ──────────────────────────────────────────

#[tokio::test]
async fn engine_wal_replay() {
    let path = test_wal_path("replay.wal");
    let vid = Ulid::new();
    let moved_to = Ulid::new();
    let uid = Ulid::new();
    let kept = Ulid::new();
    let deleted = Ulid::new();
    let moved = Ulid::new();
    let gone_vehicle = Ulid::new();
    {
        let engine = Engine::new(path.clone()).unwrap();
        engine.add_vehicle(vid, corolla()).await.unwrap();
        engine.add_vehicle(moved_to, focus()).await.unwrap();
        engine.add_vehicle(gone_vehicle, focus()).await.unwrap();
        engine
            .create_user(uid, "user@rental.com", Some("h".into()), Role::User)
            .await
            .unwrap();
        engine
            .create_reservation(kept, request(vid, uid, T0, T0 + D, ReservationStatus::Pending))
            .await
            .unwrap();
        engine
            .set_reservation_status(kept, ReservationStatus::Approved)
            .await
            .unwrap();
        engine
            .create_reservation(deleted, request(vid, uid, T0 + D, T0 + 2 * D, ReservationStatus::Pending))
            .await
            .unwrap();
        engine.delete_reservation(deleted).await.unwrap();
        engine
            .create_reservation(moved, request(vid, uid, T0 + 3 * D, T0 + 4 * D, ReservationStatus::Pending))
            .await
            .unwrap();
        engine
            .edit_reservation(
                moved,
                ReservationEdit {
                    vehicle_id: Some(moved_to),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        engine
            .update_vehicle(
                vid,
                VehiclePatch {
                    available: Some(false),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        engine
            .create_reservation(Ulid::new(), request(gone_vehicle, uid, T0, T0 + D, ReservationStatus::Approved))
            .await
            .unwrap();
        engine.delete_vehicle(gone_vehicle).await.unwrap();
    }

    let engine = Engine::new(path).unwrap();
    assert_eq!(engine.list_vehicles().await.len(), 2);
    assert!(!engine.get_vehicle(vid).await.unwrap().available);
    assert_eq!(
        engine.get_reservation(kept).await.map(|r| r.status),
        Some(ReservationStatus::Approved)
    );
    assert!(engine.get_reservation(deleted).await.is_none());
    assert_eq!(engine.get_reservation(moved).await.map(|r| r.vehicle_id), Some(moved_to));
    assert_eq!(engine.list_reservations(ReservationFilter::default()).await.len(), 2);
    assert_eq!(
        engine
            .find_user_by_email("user@rental.com")
            .await
            .and_then(|u| u.password_hash),
        Some("h".to_string())
    );
    assert!(matches!(
        engine
            .create_reservation(Ulid::new(), request(vid, uid, T0, T0 + D, ReservationStatus::Approved))
            .await,
        Err(EngineError::Conflict(id)) if id == kept
    ));
}

#[tokio::test]
async fn engine_compact_preserves_state() {
    let path = test_wal_path("compact.wal");
    let (vid, uid, rid) = (Ulid::new(), Ulid::new(), Ulid::new());
    {
        let engine = Engine::new(path.clone()).unwrap();
        engine.add_vehicle(vid, corolla()).await.unwrap();
        engine
            .create_user(uid, "user@rental.com", None, Role::User)
            .await
            .unwrap();
        for _ in 0..20 {
            let tmp = Ulid::new();
            engine
                .create_reservation(tmp, request(vid, uid, T0, T0 + D, ReservationStatus::Pending))
                .await
                .unwrap();
            engine.delete_reservation(tmp).await.unwrap();
        }
        engine
            .create_reservation(rid, request(vid, uid, T0, T0 + D, ReservationStatus::Approved))
            .await
            .unwrap();
        assert!(engine.wal_appends_since_compact().await >= 43);

        let before = std::fs::metadata(&path).unwrap().len();
        engine.compact_wal().await.unwrap();
        let after = std::fs::metadata(&path).unwrap().len();
        assert!(after < before, "compacted WAL should be smaller: {after} < {before}");
        assert_eq!(engine.wal_appends_since_compact().await, 0);

        engine
            .set_reservation_status(rid, ReservationStatus::Rejected)
            .await
            .unwrap();
    }

    let engine = Engine::new(path).unwrap();
    assert_eq!(engine.list_users().await.len(), 1);
    assert_eq!(
        engine.get_reservation(rid).await.map(|r| r.status),
        Some(ReservationStatus::Rejected)
    );
    assert_eq!(engine.list_reservations(ReservationFilter::default()).await.len(), 1);
}
