use super::*;

fn ids(channel: &str, message: &str) -> (ChannelId, MessageId) {
    (ChannelId::from(channel), MessageId::from(message))
}

#[tokio::test]
async fn removes_only_the_targeted_message_attachments() {
    let dir = tempfile::tempdir().expect("tempdir");
    let cache = FsMediaCache::open(dir.path()).await.expect("open");
    let (channel, m1) = ids("general", "m1");
    let m2 = MessageId::from("m2");

    cache
        .store_attachment(&channel, &m1, "a.png", b"one")
        .await
        .expect("store m1");
    cache
        .store_attachment(&channel, &m2, "b.png", b"two")
        .await
        .expect("store m2");
    cache
        .store_avatar(&channel, "avatar.png", b"face")
        .await
        .expect("store avatar");

    cache
        .remove_message_attachments(&channel, &m2)
        .await
        .expect("remove m2");

    assert!(cache
        .cached_attachment(&channel, &m1, "a.png")
        .await
        .expect("lookup")
        .is_some());
    assert!(cache
        .cached_attachment(&channel, &m2, "b.png")
        .await
        .expect("lookup")
        .is_none());
    assert!(cache
        .cached_avatar(&channel, "avatar.png")
        .await
        .expect("lookup")
        .is_some());
}

#[tokio::test]
async fn removes_channel_attachments_and_avatars_independently() {
    let dir = tempfile::tempdir().expect("tempdir");
    let cache = FsMediaCache::open(dir.path()).await.expect("open");
    let (channel, message) = ids("random", "m1");

    cache
        .store_attachment(&channel, &message, "a.png", b"one")
        .await
        .expect("store");
    cache
        .store_avatar(&channel, "avatar.png", b"face")
        .await
        .expect("store avatar");

    cache
        .remove_channel_attachments(&channel)
        .await
        .expect("remove attachments");
    assert!(cache
        .cached_avatar(&channel, "avatar.png")
        .await
        .expect("lookup")
        .is_some());

    cache
        .remove_channel_avatars(&channel)
        .await
        .expect("remove avatars");
    assert!(cache
        .cached_avatar(&channel, "avatar.png")
        .await
        .expect("lookup")
        .is_none());
}

#[tokio::test]
async fn removing_uncached_media_is_a_no_op() {
    let dir = tempfile::tempdir().expect("tempdir");
    let cache = FsMediaCache::open(dir.path()).await.expect("open");
    let (channel, message) = ids("ghost", "m404");

    cache
        .remove_channel_attachments(&channel)
        .await
        .expect("attachments");
    cache.remove_channel_avatars(&channel).await.expect("avatars");
    cache
        .remove_message_attachments(&channel, &message)
        .await
        .expect("message");
}

#[tokio::test]
async fn clear_empties_but_keeps_the_root() {
    let dir = tempfile::tempdir().expect("tempdir");
    let root = dir.path().join("media");
    let cache = FsMediaCache::open(&root).await.expect("open");
    let (channel, message) = ids("general", "m1");
    cache
        .store_attachment(&channel, &message, "a.png", b"one")
        .await
        .expect("store");

    cache.clear().await.expect("clear");
    cache.clear().await.expect("clear twice");

    assert!(root.exists());
    assert!(cache
        .cached_attachment(&channel, &message, "a.png")
        .await
        .expect("lookup")
        .is_none());
}

#[tokio::test]
async fn rejects_ids_that_escape_the_root() {
    let dir = tempfile::tempdir().expect("tempdir");
    let cache = FsMediaCache::open(dir.path()).await.expect("open");

    let err = cache
        .remove_channel_avatars(&ChannelId::from(".."))
        .await
        .expect_err("parent dir");
    assert!(err.to_string().contains("path component"));

    assert!(cache
        .store_avatar(&ChannelId::from("a/b"), "x.png", b"")
        .await
        .is_err());
}
