// Redis-backed token store tests. These need a reachable Redis and are
// skipped unless REDIS_URL is set, so the default test run stays hermetic.

use anyhow::Result;
use coupon_push_service::token_store::{self, RedisTokenSource, TokenSource};
use std::sync::atomic::{AtomicU64, Ordering};

static TEST_COUNTER: AtomicU64 = AtomicU64::new(0);

fn unique_ref(prefix: &str) -> String {
    let id = TEST_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("it_{prefix}_{}_{id}", std::process::id())
}

fn redis_url() -> Option<String> {
    std::env::var("REDIS_URL").ok()
}

#[tokio::test]
async fn register_and_resolve_tokens() -> Result<()> {
    let Some(url) = redis_url() else {
        eprintln!("REDIS_URL not set, skipping Redis integration test");
        return Ok(());
    };
    let pool = token_store::create_pool(&url, 4).await?;
    let source = RedisTokenSource::new(pool.clone());

    let user_ref = unique_ref("resolve");
    assert!(!source.user_exists(&user_ref).await?);

    token_store::register_token(&pool, &user_ref, "token-a").await?;
    token_store::register_token(&pool, &user_ref, "token-b").await?;
    // Re-registering an existing token moves it to the back, no duplicate.
    token_store::register_token(&pool, &user_ref, "token-a").await?;

    assert!(source.user_exists(&user_ref).await?);
    let tokens = source.tokens_for_user(&user_ref).await?;
    assert_eq!(tokens, vec!["token-b", "token-a"]);

    let all_refs = source.all_user_refs().await?;
    assert!(all_refs.contains(&user_ref));
    Ok(())
}

#[tokio::test]
async fn user_without_tokens_resolves_to_empty() -> Result<()> {
    let Some(url) = redis_url() else {
        eprintln!("REDIS_URL not set, skipping Redis integration test");
        return Ok(());
    };
    let pool = token_store::create_pool(&url, 4).await?;
    let source = RedisTokenSource::new(pool.clone());

    let user_ref = unique_ref("tokenless");
    token_store::register_user(&pool, &user_ref).await?;

    assert!(source.user_exists(&user_ref).await?);
    assert!(source.tokens_for_user(&user_ref).await?.is_empty());
    Ok(())
}
