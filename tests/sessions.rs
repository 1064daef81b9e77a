use anyhow::Result;
use stageflow::{GuestContext, Store};
use stageflow::sessions::{LinkOutcome, SessionState};
use stageflow::subscriptions::WatchOptions;
use testcontainers::{
    GenericImage, ImageExt,
    core::{IntoContainerPort, WaitFor},
    runners::AsyncRunner,
};
use tokio::time::{Duration, timeout};
use uuid::Uuid;

fn ctx() -> GuestContext {
    GuestContext {
        project_id: Uuid::new_v4(),
        workspace_id: Uuid::new_v4(),
        event_id: Uuid::new_v4(),
        experience_id: Uuid::new_v4(),
    }
}

async fn session_count(store: &Store) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("select count(*) from guest_sessions")
        .fetch_one(store.pool())
        .await?;
    Ok(count)
}

#[tokio::test]
async fn binder_creates_exactly_one_session() -> Result<()> {
    let image = GenericImage::new("postgres", "16-alpine")
        .with_exposed_port(5432.tcp())
        .with_wait_for(WaitFor::message_on_stderr(
            "database system is ready to accept connections",
        ))
        .with_env_var("POSTGRES_USER", "postgres")
        .with_env_var("POSTGRES_PASSWORD", "postgres");
    let container = image.start().await?;
    let host = container.get_host().await?;
    let port = container.get_host_port_ipv4(5432).await?;
    let url = format!("postgres://postgres:postgres@{host}:{port}/postgres?sslmode=disable");

    let store = Store::connect(&url).await?;
    stageflow::testing::migrate_core_schema(store.pool()).await?;

    let binder = store.sessions().binder(ctx());

    // Re-renders calling ensure repeatedly, including concurrently, must
    // resolve the same single session.
    let (a, b) = tokio::join!(binder.ensure(None), binder.ensure(None));
    let a = a?;
    let b = b?;
    assert_eq!(a.session_id(), b.session_id());

    let c = binder.ensure(None).await?;
    assert_eq!(a.session_id(), c.session_id());

    assert_eq!(session_count(&store).await?, 1);
    assert_eq!(binder.session_id(), Some(a.session_id()));

    Ok(())
}

#[tokio::test]
async fn binder_resumes_existing_session_from_url_id() -> Result<()> {
    let image = GenericImage::new("postgres", "16-alpine")
        .with_exposed_port(5432.tcp())
        .with_wait_for(WaitFor::message_on_stderr(
            "database system is ready to accept connections",
        ))
        .with_env_var("POSTGRES_USER", "postgres")
        .with_env_var("POSTGRES_PASSWORD", "postgres");
    let container = image.start().await?;
    let host = container.get_host().await?;
    let port = container.get_host_port_ipv4(5432).await?;
    let url = format!("postgres://postgres:postgres@{host}:{port}/postgres?sslmode=disable");

    let store = Store::connect(&url).await?;
    stageflow::testing::migrate_core_schema(store.pool()).await?;

    let sessions = store.sessions();
    let context = ctx();
    let original = sessions.create(&context).await?;

    // A reload recovered the session id from the URL: no new row.
    let binder = sessions.binder(context);
    let handle = binder.ensure(Some(original.id)).await?;
    assert_eq!(handle.session_id(), original.id);
    assert_eq!(session_count(&store).await?, 1);

    Ok(())
}

#[tokio::test]
async fn stale_url_id_falls_back_to_creation() -> Result<()> {
    let image = GenericImage::new("postgres", "16-alpine")
        .with_exposed_port(5432.tcp())
        .with_wait_for(WaitFor::message_on_stderr(
            "database system is ready to accept connections",
        ))
        .with_env_var("POSTGRES_USER", "postgres")
        .with_env_var("POSTGRES_PASSWORD", "postgres");
    let container = image.start().await?;
    let host = container.get_host().await?;
    let port = container.get_host_port_ipv4(5432).await?;
    let url = format!("postgres://postgres:postgres@{host}:{port}/postgres?sslmode=disable");

    let store = Store::connect(&url).await?;
    stageflow::testing::migrate_core_schema(store.pool()).await?;

    let binder = store.sessions().binder(ctx());
    let stale = Uuid::new_v4();
    let handle = binder.ensure(Some(stale)).await?;
    assert_ne!(handle.session_id(), stale);
    assert_eq!(session_count(&store).await?, 1);

    Ok(())
}

#[tokio::test]
async fn link_fires_once_and_watch_delivers_it() -> Result<()> {
    let image = GenericImage::new("postgres", "16-alpine")
        .with_exposed_port(5432.tcp())
        .with_wait_for(WaitFor::message_on_stderr(
            "database system is ready to accept connections",
        ))
        .with_env_var("POSTGRES_USER", "postgres")
        .with_env_var("POSTGRES_PASSWORD", "postgres");
    let container = image.start().await?;
    let host = container.get_host().await?;
    let port = container.get_host_port_ipv4(5432).await?;
    let url = format!("postgres://postgres:postgres@{host}:{port}/postgres?sslmode=disable");

    let store = Store::connect(&url).await?;
    stageflow::testing::migrate_core_schema(store.pool()).await?;

    let sessions = store.sessions();
    let context = ctx();
    let main = sessions.create(&context).await?;

    let binder = sessions.binder(context).watch_options(WatchOptions {
        poll_interval: Duration::from_millis(50),
    });
    let mut handle = binder.ensure(None).await?;
    let record = timeout(Duration::from_secs(5), handle.ready()).await??;
    assert_eq!(record.main_session_id, None);

    assert_eq!(
        sessions.link(&handle.session_id(), &main.id).await?,
        LinkOutcome::Linked
    );
    // The triggering condition re-firing must not relink to someone else.
    let other = Uuid::new_v4();
    assert_eq!(
        sessions.link(&handle.session_id(), &other).await?,
        LinkOutcome::AlreadyLinked(main.id)
    );

    // The live subscription observes the committed link.
    let linked = timeout(Duration::from_secs(5), async {
        loop {
            match handle.changed().await.unwrap() {
                SessionState::Ready(record) if record.main_session_id.is_some() => {
                    return record;
                }
                _ => {}
            }
        }
    })
    .await?;
    assert_eq!(linked.main_session_id, Some(main.id));

    Ok(())
}

#[tokio::test]
async fn link_missing_session_is_an_error() -> Result<()> {
    let image = GenericImage::new("postgres", "16-alpine")
        .with_exposed_port(5432.tcp())
        .with_wait_for(WaitFor::message_on_stderr(
            "database system is ready to accept connections",
        ))
        .with_env_var("POSTGRES_USER", "postgres")
        .with_env_var("POSTGRES_PASSWORD", "postgres");
    let container = image.start().await?;
    let host = container.get_host().await?;
    let port = container.get_host_port_ipv4(5432).await?;
    let url = format!("postgres://postgres:postgres@{host}:{port}/postgres?sslmode=disable");

    let store = Store::connect(&url).await?;
    stageflow::testing::migrate_core_schema(store.pool()).await?;

    let missing = Uuid::new_v4();
    let main = Uuid::new_v4();
    assert!(matches!(
        store.sessions().link(&missing, &main).await,
        Err(stageflow::Error::SessionNotFound(_))
    ));

    Ok(())
}

#[tokio::test]
async fn ensure_linked_links_the_child_to_main() -> Result<()> {
    let image = GenericImage::new("postgres", "16-alpine")
        .with_exposed_port(5432.tcp())
        .with_wait_for(WaitFor::message_on_stderr(
            "database system is ready to accept connections",
        ))
        .with_env_var("POSTGRES_USER", "postgres")
        .with_env_var("POSTGRES_PASSWORD", "postgres");
    let container = image.start().await?;
    let host = container.get_host().await?;
    let port = container.get_host_port_ipv4(5432).await?;
    let url = format!("postgres://postgres:postgres@{host}:{port}/postgres?sslmode=disable");

    let store = Store::connect(&url).await?;
    stageflow::testing::migrate_core_schema(store.pool()).await?;

    let sessions = store.sessions();
    let context = ctx();
    let main = sessions.create(&context).await?;

    let binder = sessions.binder(context).watch_options(WatchOptions {
        poll_interval: Duration::from_millis(50),
    });
    // ensure_linked re-invoked on every render: one session, one link.
    let mut handle = binder.ensure_linked(None, main.id).await?;
    let _ = binder.ensure_linked(None, main.id).await?;

    let linked = timeout(Duration::from_secs(5), async {
        loop {
            if let SessionState::Ready(record) = handle.state() {
                if record.main_session_id.is_some() {
                    return record;
                }
            }
            handle.changed().await.unwrap();
        }
    })
    .await?;
    assert_eq!(linked.main_session_id, Some(main.id));
    assert_eq!(session_count(&store).await?, 2);

    Ok(())
}
