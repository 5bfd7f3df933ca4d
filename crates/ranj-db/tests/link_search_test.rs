//! Link search integration tests against PostgreSQL.

use chrono::{Duration, Utc};
use ranj_db::test_fixtures::{cleanup_user, connect_test};
use ranj_db::{
    LexicalQuery, LinkRepository, LinkSearchRepository, LinkUpdate, RecencyKey, SemanticQuery,
    TagAssignment, TagFilter, TagRepository, Vector,
};
use uuid::Uuid;

async fn insert_link(pool: &sqlx::PgPool, user: Uuid, title: &str, age_minutes: i64) -> Uuid {
    let id = Uuid::now_v7();
    sqlx::query(
        "INSERT INTO link (id, url, title, state, user_id, created_at)
         VALUES ($1, $2, $3, 'processed', $4, $5)",
    )
    .bind(id)
    .bind(format!("https://example.com/{id}"))
    .bind(title)
    .bind(user)
    .bind(Utc::now() - Duration::minutes(age_minutes))
    .execute(pool)
    .await
    .expect("insert link");
    id
}

fn unit_vector(hot: usize) -> Vector {
    let mut v = vec![0.0f32; 1536];
    v[hot] = 1.0;
    Vector::from(v)
}

#[tokio::test]
#[ignore] // Requires DATABASE_URL with migrated database
async fn test_untagged_sentinel_pages_through_untagged_links() {
    let db = connect_test().await.expect("connect");
    let user = Uuid::new_v4();

    let untagged: Vec<Uuid> = vec![
        insert_link(&db.pool, user, "one", 1).await,
        insert_link(&db.pool, user, "two", 2).await,
        insert_link(&db.pool, user, "three", 3).await,
    ];
    let system = db.tags.list_system().await.unwrap();
    for title in ["tagged a", "tagged b"] {
        let id = insert_link(&db.pool, user, title, 0).await;
        db.tags
            .set_for_link(
                id,
                user,
                &[TagAssignment {
                    id: Some(system[0].id),
                    name: system[0].name.clone(),
                    color: system[0].color.clone(),
                }],
            )
            .await
            .unwrap();
    }

    let mut query = LexicalQuery {
        user_id: user,
        text: None,
        tags: TagFilter::untagged(),
        after: None,
        fetch_limit: 3,
    };
    let first = db.search.lexical_page(&query).await.unwrap();
    assert_eq!(first.len(), 3);
    assert_eq!(first[0].id, untagged[0]);
    assert!(first.iter().all(|row| row.tags.is_empty()));
    assert_eq!(db.search.lexical_count(&query).await.unwrap(), 3);

    query.after = Some(RecencyKey {
        created_at: first[1].created_at,
        id: first[1].id,
    });
    let rest = db.search.lexical_page(&query).await.unwrap();
    assert_eq!(rest.len(), 1);
    assert_eq!(rest[0].id, untagged[2]);

    cleanup_user(&db.pool, user).await.unwrap();
}

#[tokio::test]
#[ignore] // Requires DATABASE_URL with migrated database
async fn test_full_text_matches_notes() {
    let db = connect_test().await.expect("connect");
    let user = Uuid::new_v4();
    let id = insert_link(&db.pool, user, "Unrelated title", 0).await;
    insert_link(&db.pool, user, "Other", 1).await;

    db.links
        .update(
            id,
            user,
            LinkUpdate {
                notes: Some(serde_json::json!({"content": [{"text": "kubernetes operators"}]})),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let query = LexicalQuery {
        user_id: user,
        text: Some("kubernetes".to_string()),
        tags: TagFilter::none(),
        after: None,
        fetch_limit: 10,
    };
    let rows = db.search.lexical_page(&query).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].id, id);
    assert!(rows[0].score.unwrap_or_default() > 0.0);

    cleanup_user(&db.pool, user).await.unwrap();
}

#[tokio::test]
#[ignore] // Requires DATABASE_URL with migrated database
async fn test_semantic_floor_excludes_from_page_and_count() {
    let db = connect_test().await.expect("connect");
    let user = Uuid::new_v4();
    let close = insert_link(&db.pool, user, "close", 0).await;
    let far = insert_link(&db.pool, user, "far", 1).await;
    db.links.set_embedding(close, &unit_vector(0)).await.unwrap();
    db.links.set_embedding(far, &unit_vector(1)).await.unwrap();

    let query = SemanticQuery {
        user_id: user,
        embedding: unit_vector(0),
        floor: 0.7,
        tags: TagFilter::none(),
        after: None,
        fetch_limit: 10,
    };
    let rows = db.search.semantic_page(&query).await.unwrap();
    assert_eq!(rows.iter().map(|r| r.id).collect::<Vec<_>>(), vec![close]);
    assert_eq!(db.search.semantic_count(&query).await.unwrap(), 1);

    cleanup_user(&db.pool, user).await.unwrap();
}
