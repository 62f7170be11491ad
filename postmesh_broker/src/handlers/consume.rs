//! INITIALISE_CONSUMER handling: backfill plus the long-lived keep-alive
//! push worker.

use crate::topic::{BrokerTopic, TopicRecord};
use log::{debug, trace};
use postmesh_codec::{write_packet, write_post_count, write_post_info, KEEP_ALIVE_POST_COUNT};
use postmesh_common::Result;
use std::sync::Arc;
use tokio::io::AsyncWrite;
use tokio_util::sync::CancellationToken;

/// Writes the finite backfill (`postCount` posts since `last_seen_id`), then
/// the keep-alive sentinel, then forwards every subsequent log record until
/// cancelled or the write side fails.
///
/// The transition from the finite-count backfill phase to the
/// `KEEP_ALIVE_POST_COUNT` tailing phase happens below, between the backfill
/// loop and the subscriber `select!`.
pub async fn run_push_worker<W>(
    writer: &mut W,
    topic: Arc<BrokerTopic>,
    last_seen_id: i64,
    cancel: CancellationToken,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let backfill = topic.posts_since(last_seen_id);
    trace!(
        "backfilling {} posts on topic {} since id {last_seen_id}",
        backfill.len(),
        topic.name()
    );
    write_post_count(writer, backfill.len() as i32).await?;
    for (info, packets) in backfill {
        write_post_info(writer, &info).await?;
        for packet in packets {
            write_packet(writer, &packet).await?;
        }
    }
    write_post_count(writer, KEEP_ALIVE_POST_COUNT).await?;

    let (subscriber_id, mut rx) = topic.subscribe();
    let result = loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("push worker for {} cancelled", topic.name());
                break Ok(());
            }
            record = rx.recv() => {
                match record {
                    Some(TopicRecord::Info(info)) => {
                        if let Err(e) = write_post_info(writer, &info).await {
                            break Err(e);
                        }
                    }
                    Some(TopicRecord::Packet(packet)) => {
                        if let Err(e) = write_packet(writer, &packet).await {
                            break Err(e);
                        }
                    }
                    None => break Ok(()),
                }
            }
        }
    };
    topic.unsubscribe(subscriber_id);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use postmesh_common::{FETCH_ALL_SENTINEL, Packet, PostInfo};

    #[tokio::test]
    async fn backfill_then_cancel_writes_count_prefix_and_posts() {
        let topic = Arc::new(BrokerTopic::new("t"));
        topic.append_post_info(PostInfo::new("u", "txt", 1));
        topic.append_packet(Packet {
            post_id: 1,
            index: 0,
            is_final: true,
            payload: b"hi".to_vec(),
        });

        let mut buf = Vec::new();
        let cancel = CancellationToken::new();
        cancel.cancel();
        run_push_worker(&mut buf, topic, FETCH_ALL_SENTINEL, cancel)
            .await
            .unwrap();

        // Parse back: count=1, then PostInfo/Packet, then KEEP_ALIVE sentinel.
        use postmesh_codec::{read_packet, read_post_count, read_post_info};
        let mut cursor = std::io::Cursor::new(buf);
        let count = read_post_count(&mut cursor).await.unwrap();
        assert_eq!(count, 1);
        let info = read_post_info(&mut cursor).await.unwrap();
        assert_eq!(info.id, 1);
        let packet = read_packet(&mut cursor).await.unwrap();
        assert!(packet.is_final);
        let sentinel = read_post_count(&mut cursor).await.unwrap();
        assert_eq!(sentinel, KEEP_ALIVE_POST_COUNT);
    }
}
