use dumps::models::{NewPost, NewScan, NewWildThought, Pagination, PostFilter, PostUpdate};
use dumps::repo::RepoError;
// Bring trait method namespaces into scope so calls on the concrete repos resolve.
use dumps::repo::{PostRepo, ScanRepo, WildThoughtRepo};
use dumps::tokens::UserToken;

fn new_post(content: &str, hashtag: &str, token: &UserToken) -> NewPost {
    NewPost {
        content: content.into(),
        hashtag: hashtag.into(),
        user_token: token.clone(),
        image_url: None,
        fictional_name: None,
    }
}

fn first_page() -> Pagination {
    Pagination::new(None, None, 10).unwrap()
}

#[cfg(feature = "inmem-store")]
mod inmem {
    use super::*;
    use dumps::repo::inmem::InMemRepo;

    #[tokio::test]
    async fn ownership_is_enforced() {
        let r = InMemRepo::ephemeral();
        let alice = UserToken::from("alice");
        let bob = UserToken::from("bob");
        let p = r.create_post(new_post("hello", "general", &alice)).await.unwrap();

        let err = r
            .update_post(p.id, &bob, PostUpdate { content: Some("mine now".into()), ..Default::default() })
            .await
            .unwrap_err();
        assert!(matches!(err, RepoError::NotFound));
        assert!(matches!(r.delete_post(p.id, &bob).await.unwrap_err(), RepoError::NotFound));
        let (rows, _) = r.list_posts(PostFilter::Owner("alice".into()), first_page()).await.unwrap();
        assert_eq!(rows[0].content, "hello");

        let updated = r
            .update_post(p.id, &alice, PostUpdate { hashtag: Some("campus".into()), ..Default::default() })
            .await
            .unwrap();
        assert_eq!(updated.hashtag, "campus");
        assert_eq!(updated.content, "hello");

        r.delete_post(p.id, &alice).await.unwrap();
        let (_, total) = r.list_posts(PostFilter::All, first_page()).await.unwrap();
        assert_eq!(total, 0);
        assert!(matches!(r.react_to_post(p.id, "heart").await.unwrap_err(), RepoError::NotFound));
    }

    #[tokio::test]
    async fn filters_and_totals() {
        let r = InMemRepo::ephemeral();
        let alice = UserToken::from("alice");
        let bob = UserToken::from("bob");
        for i in 0..3 {
            r.create_post(new_post(&format!("a{i}"), "general", &alice)).await.unwrap();
        }
        r.create_post(new_post("b0", "campus", &bob)).await.unwrap();

        let (rows, total) = r.list_posts(PostFilter::All, Pagination::new(Some(1), Some(2), 10).unwrap()).await.unwrap();
        assert_eq!(total, 4);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].content, "b0");

        let (rows, total) = r.list_posts(PostFilter::Owner("alice".into()), first_page()).await.unwrap();
        assert_eq!(total, 3);
        assert!(rows.iter().all(|p| p.user_token == "alice"));

        let (rows, total) = r.list_posts(PostFilter::Hashtag("campus".into()), first_page()).await.unwrap();
        assert_eq!(total, 1);
        assert_eq!(rows[0].content, "b0");

        // past the end is empty, total unchanged
        let (rows, total) = r.list_posts(PostFilter::All, Pagination::new(Some(9), Some(10), 10).unwrap()).await.unwrap();
        assert!(rows.is_empty());
        assert_eq!(total, 4);
    }

    #[tokio::test]
    async fn reaction_toggle_and_missing_post() {
        let r = InMemRepo::ephemeral();
        let p = r.create_post(new_post("x", "general", &UserToken::from("t"))).await.unwrap();
        assert_eq!(r.react_to_post(p.id, "laugh").await.unwrap().reactions.laugh, 1);
        assert_eq!(r.react_to_post(p.id, "laugh").await.unwrap().reactions.laugh, 0);
        assert!(matches!(r.react_to_post(p.id + 100, "laugh").await.unwrap_err(), RepoError::NotFound));
    }

    #[tokio::test]
    async fn snapshot_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let token = UserToken::from("alice");

        let first_id = {
            let r = InMemRepo::with_snapshot(path.clone());
            let p = r.create_post(new_post("persisted", "general", &token)).await.unwrap();
            r.record_scan(NewScan::default()).await.unwrap();
            r.create_wild_thought(NewWildThought::new("hi", Some("10.0.0.1".into())).unwrap()).await.unwrap();
            p.id
        };

        let r = InMemRepo::with_snapshot(path);
        let (rows, _) = r.list_posts(PostFilter::All, first_page()).await.unwrap();
        assert_eq!(rows[0].id, first_id);
        assert_eq!(rows[0].content, "persisted");
        assert_eq!(r.count_scans().await.unwrap(), 1);
        assert_eq!(r.count_wild_thoughts().await.unwrap(), 1);
        let next = r.create_post(new_post("after restart", "general", &token)).await.unwrap();
        assert!(next.id > first_id);
    }
}

// Runs against a real database only when DATABASE_URL is set.
#[cfg(feature = "postgres-store")]
mod pg {
    use super::*;
    use dumps::repo::pg::PgRepo;
    use sqlx::postgres::PgPoolOptions;

    async fn repo() -> Option<PgRepo> {
        let url = std::env::var("DATABASE_URL").ok()?;
        let pool = PgPoolOptions::new().max_connections(2).connect(&url).await.ok()?;
        let r = PgRepo::new(pool);
        r.migrate().await.ok()?;
        Some(r)
    }

    #[tokio::test]
    async fn pg_post_lifecycle() {
        let Some(r) = repo().await else {
            eprintln!("skipping: DATABASE_URL not set");
            return;
        };
        let owner = UserToken::generate();
        let other = UserToken::generate();

        let p = r.create_post(new_post("pg hello", "pg-test", &owner)).await.unwrap();
        assert_eq!(p.fictional_name, "Anonymous");
        assert_eq!(p.reactions.heart, 0);

        let (rows, total) = r.list_posts(PostFilter::Owner(owner.as_str().into()), first_page()).await.unwrap();
        assert_eq!(total, 1);
        assert_eq!(rows[0].id, p.id);

        assert!(matches!(
            r.update_post(p.id, &other, PostUpdate { content: Some("nope".into()), ..Default::default() }).await.unwrap_err(),
            RepoError::NotFound
        ));
        let upd = r
            .update_post(p.id, &owner, PostUpdate { content: Some("edited".into()), ..Default::default() })
            .await
            .unwrap();
        assert_eq!(upd.content, "edited");
        assert_eq!(upd.hashtag, "pg-test");

        assert_eq!(r.react_to_post(p.id, "heart").await.unwrap().reactions.heart, 1);
        assert_eq!(r.react_to_post(p.id, "heart").await.unwrap().reactions.heart, 0);

        assert!(matches!(r.delete_post(p.id, &other).await.unwrap_err(), RepoError::NotFound));
        r.delete_post(p.id, &owner).await.unwrap();
        assert!(matches!(r.react_to_post(p.id, "heart").await.unwrap_err(), RepoError::NotFound));
    }

    #[tokio::test]
    async fn pg_scans_and_thoughts() {
        let Some(r) = repo().await else {
            eprintln!("skipping: DATABASE_URL not set");
            return;
        };
        let before = r.count_scans().await.unwrap();
        r.record_scan(NewScan { ip_address: Some("127.0.0.1".into()), user_agent: Some("test".into()) }).await.unwrap();
        assert!(r.count_scans().await.unwrap() > before);

        let t = r.create_wild_thought(NewWildThought::new("  pg thought ", None).unwrap()).await.unwrap();
        assert_eq!(t.content, "pg thought");
        let (rows, total) = r.list_wild_thoughts(first_page()).await.unwrap();
        assert!(total >= 1);
        assert!(!rows.is_empty());
    }
}
