mod common;

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use common::{Post, User, add_user, client, stub};
use docmodel::prelude::*;

#[tokio::test]
async fn read_modify_write_commits() {
    let client = client().await;
    let ctx = Context::new();
    let dave = add_user(&client, &ctx, "Dave").await;
    let path = DocumentPath::new("users", dave.id());

    let body_path = path.clone();
    client
        .run_transaction(&ctx, move |tx| {
            let path = body_path.clone();
            async move {
                let mut user = User::default();
                tx.get(&path, &mut user).await?;
                user.visits += 1;
                tx.set(&path, &user).await
            }
            .boxed()
        })
        .await
        .unwrap();

    let mut read = User::default();
    client
        .collection("users")
        .doc(dave.id())
        .get(&ctx, &mut read)
        .await
        .unwrap();
    assert_eq!(read.visits, 1);
    assert_eq!(read.name, "Dave");
}

#[tokio::test]
async fn conflicting_writers_are_retried() {
    let client = client().await;
    let ctx = Context::new();
    let dave = add_user(&client, &ctx, "Dave").await;
    let path = DocumentPath::new("users", dave.id());
    let attempts = Arc::new(AtomicUsize::new(0));

    let outside = client.clone();
    let counter = attempts.clone();
    let body_path = path.clone();
    client
        .run_transaction(&ctx, move |tx| {
            let outside = outside.clone();
            let counter = counter.clone();
            let path = body_path.clone();
            async move {
                let mut user = User::default();
                tx.get(&path, &mut user).await?;

                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    let mut racer = user.clone();
                    racer.visits = 10;
                    outside
                        .collection("users")
                        .doc(path.id.clone())
                        .set(tx.ctx(), &racer)
                        .await?;
                }

                user.visits += 1;
                tx.set(&path, &user).await
            }
            .boxed()
        })
        .await
        .unwrap();

    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    let mut read = User::default();
    client.doc(&path.to_string()).unwrap().get(&ctx, &mut read).await.unwrap();
    assert_eq!(read.visits, 11);
}

#[tokio::test]
async fn body_errors_roll_back() {
    let client = client().await;
    let ctx = Context::new();

    let result = client
        .run_transaction(&ctx, |tx| {
            async move {
                let user = User { meta: ModelMeta::with_id("u1"), name: "Dave".into(), ..Default::default() };
                tx.set(&DocumentPath::new("users", "u1"), &user).await?;
                Err::<(), _>(DocumentStoreError::Transaction("changed my mind".into()))
            }
            .boxed()
        })
        .await;

    assert_eq!(result, Err(DocumentStoreError::Transaction("changed my mind".into())));
    let mut read = User::default();
    let err = client
        .collection("users")
        .doc("u1")
        .get(&ctx, &mut read)
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn reads_inside_transactions_expand() {
    let client = client().await;
    let ctx = Context::new();
    let dave = add_user(&client, &ctx, "Dave").await;

    client
        .collection("posts")
        .doc("p1")
        .set(&ctx, &Post { body: "hi".into(), author: Some(Box::new(stub(dave.id()))), ..Default::default() })
        .await
        .unwrap();

    let names = Arc::new(std::sync::Mutex::new(Vec::new()));
    let seen = names.clone();
    client
        .run_transaction(&ctx, move |tx| {
            let seen = seen.clone();
            async move {
                let mut post = Post::default();
                tx.get(&DocumentPath::new("posts", "p1"), &mut post).await?;

                let query = QueryBuilder::new()
                    .filter(Filter::eq("body", "hi"))
                    .build();
                let posts = tx
                    .documents("posts", &query)
                    .await?
                    .get_all::<Post>(tx.ctx())
                    .await?;

                let mut seen = seen.lock().unwrap();
                seen.push(post.author.map(|a| a.name).unwrap_or_default());
                seen.extend(posts.into_iter().filter_map(|p| p.author.map(|a| a.name)));
                Ok(())
            }
            .boxed()
        })
        .await
        .unwrap();

    assert_eq!(*names.lock().unwrap(), vec!["Dave".to_string(), "Dave".to_string()]);
}
