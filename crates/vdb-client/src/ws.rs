use futures_util::StreamExt;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;

use crate::error::ClientError;
use crate::service::{ChannelFeed, ChannelFrame, TransportChannel};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub async fn open_channel(url: &Url, capacity: usize) -> Result<TransportChannel, ClientError> {
    let (ws, _) = connect_async(url.as_str()).await?;
    info!(url = %url, "channel_opened");
    let (feed, channel) = TransportChannel::pair(capacity);
    tokio::spawn(read_frames(ws, feed));
    Ok(channel)
}

async fn read_frames(mut ws: Socket, feed: ChannelFeed) {
    let ChannelFeed {
        frames,
        mut shutdown,
    } = feed;
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                debug!("channel_shutdown");
                let _ = ws.close(None).await;
                return;
            }
            msg = ws.next() => {
                let frame = match msg {
                    Some(Ok(Message::Text(text))) => ChannelFrame::Text(text),
                    Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                        Ok(text) => ChannelFrame::Text(text),
                        Err(_) => ChannelFrame::Error("binary frame is not valid utf-8".to_string()),
                    },
                    Some(Ok(Message::Close(_))) | None => {
                        debug!("channel_remote_closed");
                        let _ = frames.send(ChannelFrame::Closed).await;
                        return;
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(err)) => {
                        warn!("channel_read_error: {err}");
                        let _ = frames.send(ChannelFrame::Error(err.to_string())).await;
                        return;
                    }
                };
                let failed = matches!(frame, ChannelFrame::Error(_));
                if frames.send(frame).await.is_err() || failed {
                    let _ = ws.close(None).await;
                    return;
                }
            }
        }
    }
}
