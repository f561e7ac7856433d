use chrono::NaiveDate;
use engage_core::testing::MockRemote;
use engage_core::{
    write_targets, ActionError, EngineConfig, Identity, IdentitySession, Location, ManualClock,
    TargetLedger, UserInfo,
};
use std::sync::Arc;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

fn session_with(mock: &Arc<MockRemote>, tweak: impl FnOnce(&mut EngineConfig)) -> IdentitySession {
    let mut config = EngineConfig::default();
    tweak(&mut config);
    IdentitySession::new(
        Arc::new(Identity::authenticated("scraper")),
        mock.clone(),
        Arc::new(config),
        Arc::new(ManualClock::new(NaiveDate::from_ymd_opt(2024, 6, 1).unwrap())),
    )
    .with_seed(11)
}

fn audience_mock() -> MockRemote {
    MockRemote::new()
        .with_medias(
            "bob",
            vec![MockRemote::media("m_new", "bob", 3, 5), MockRemote::media("m_old", "bob", 3, 1)],
        )
        .with_likers("m_old", &["anna", "ben"])
        .with_likers("m_new", &["ben", "cara"])
        .with_comments("m_new", &["dan"])
        .with_comments("m_old", &["erin", "anna"])
}

#[tokio::test(start_paused = true)]
async fn test_engagement_summary() {
    let mock = Arc::new(
        MockRemote::new()
            .with_user(UserInfo {
                username: "bob".into(),
                follower_count: 1000,
                following_count: 50,
                ..Default::default()
            })
            .with_medias(
                "bob",
                vec![
                    MockRemote::media("a", "bob", 10, 1),
                    MockRemote::media("b", "bob", 20, 3),
                    MockRemote::media("c", "bob", 30, 2),
                ],
            ),
    );
    let session = session_with(&mock, |_| {});

    let summary = session
        .engagement_summary("bob", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.followers, 1000);
    assert_eq!(summary.posts_analyzed, 3);
    assert!((summary.avg_likes - 20.0).abs() < f64::EPSILON);
    assert!((summary.engagement_rate - 2.0).abs() < 1e-9);
    assert_eq!(summary.most_recent.map(|m| m.id), Some("b".to_string()));
}

#[tokio::test(start_paused = true)]
async fn test_likers_and_commenters_over_all_posts() {
    let mock = Arc::new(audience_mock());
    let session = session_with(&mock, |_| {});

    let scrape = session
        .scrape_likers_commenters("bob", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(scrape.all_users(), vec!["anna", "ben", "cara", "dan", "erin"]);
    assert_eq!(scrape.likers.len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_likers_and_commenters_most_recent_post_only() {
    let mock = Arc::new(audience_mock());
    let session = session_with(&mock, |c| c.scrape_likes_mode = 1);

    let scrape = session
        .scrape_likers_commenters("bob", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(scrape.all_users(), vec!["ben", "cara", "dan"]);
    assert_eq!(mock.calls("media_likers"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_location_owners_are_unique() {
    let posts = vec![
        MockRemote::media("p1", "xena", 1, 1),
        MockRemote::media("p2", "yuri", 1, 2),
        MockRemote::media("p3", "xena", 1, 3),
    ];
    let mock = Arc::new(MockRemote::new().with_location(
        Location {
            id: "loc1".into(),
            name: "Central Park".into(),
        },
        posts,
    ));
    let session = session_with(&mock, |_| {});

    let scrape = session
        .scrape_location("central park", None, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(scrape.location_id, "loc1");
    assert_eq!(scrape.posts.len(), 3);
    assert_eq!(scrape.owners, vec!["xena", "yuri"]);

    let limited = session
        .scrape_location("central", Some(1), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(limited.posts.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_unknown_location_is_not_found() {
    let mock = Arc::new(MockRemote::new());
    let session = session_with(&mock, |_| {});

    let result = session
        .scrape_location("nowhere", None, &CancellationToken::new())
        .await;

    assert!(matches!(result, Err(ActionError::NotFound { .. })));
    assert_eq!(mock.calls("location_medias"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_tagged_posts() {
    let mock = Arc::new(MockRemote::new().with_tagged(
        "bob",
        vec![MockRemote::media("t1", "zoe", 4, 1), MockRemote::media("t2", "yan", 2, 2)],
    ));
    let session = session_with(&mock, |_| {});

    let scrape = session
        .scrape_tagged_posts("bob", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(scrape.user_id, "id_bob");
    assert_eq!(scrape.posts.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_scraped_users_feed_a_ledger() {
    let dir = TempDir::new().unwrap();
    let mock = Arc::new(audience_mock());
    let session = session_with(&mock, |_| {});
    let scrape = session
        .scrape_likers_commenters("bob", &CancellationToken::new())
        .await
        .unwrap();

    let path = dir.path().join("bob_audience.txt");
    write_targets(&path, Some("likers and commenters of bob"), &scrape.all_users()).unwrap();

    let ledger = TargetLedger::open(&path, dir.path().join("done.txt")).unwrap();
    assert_eq!(ledger.pending().await.len(), 5);
}
