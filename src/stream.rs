//! 把 watch 通道包装成 Stream：先发出当前值，之后每次变化发出一次

use futures_util::stream::{self, Stream};
use tokio::sync::watch;

pub type BoxStream<T> = futures_util::stream::BoxStream<'static, T>;

pub fn watch_stream<T>(rx: watch::Receiver<T>) -> impl Stream<Item = T> + Send + 'static
where
    T: Clone + Send + Sync + 'static,
{
    stream::unfold((rx, true), |(mut rx, first)| async move {
        if !first && rx.changed().await.is_err() {
            return None;
        }
        let value = rx.borrow_and_update().clone();
        Some((value, (rx, false)))
    })
}
