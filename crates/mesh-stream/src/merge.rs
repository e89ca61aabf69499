//! Two-way ordered merge of cursor streams.

use futures_util::stream::{self, Stream, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::cursor::Cursor;

/// Merge two position-ordered streams into one ordered stream.
///
/// Each side is pulled only when its head is needed, so at most one item per
/// side is buffered. On equal positions the left item is emitted first.
pub fn merge_cursor_streams<T, L, R>(left: L, right: R) -> impl Stream<Item = Cursor<T>>
where
    L: Stream<Item = Cursor<T>>,
    R: Stream<Item = Cursor<T>>,
{
    let sides = (Box::pin(left.peekable()), Box::pin(right.peekable()));

    stream::unfold(sides, |(mut left, mut right)| async move {
        let take_left = match (left.as_mut().peek().await, right.as_mut().peek().await) {
            (None, None) => return None,
            (Some(_), None) => true,
            (None, Some(_)) => false,
            (Some(l), Some(r)) => l.position <= r.position,
        };

        let next = if take_left {
            left.next().await
        } else {
            right.next().await
        };
        next.map(|cursor| (cursor, (left, right)))
    })
}

/// `merge_cursor_streams` that stops as soon as `token` is cancelled.
pub fn merge_cursor_streams_until<T, L, R>(
    left: L,
    right: R,
    token: CancellationToken,
) -> impl Stream<Item = Cursor<T>>
where
    L: Stream<Item = Cursor<T>>,
    R: Stream<Item = Cursor<T>>,
{
    merge_cursor_streams(left, right).take_until(async move { token.cancelled().await })
}
