//! 串行操作队列
//!
//! 后台任务按提交顺序逐个执行操作，前一个操作完成后才开始下一个。

use std::future::Future;
use tokio::sync::mpsc;

/// 启动队列任务，返回提交端；提交端全部丢弃后任务退出
pub(crate) fn spawn_serial<T, F, Fut>(mut perform: F) -> mpsc::UnboundedSender<T>
where
    T: Send + 'static,
    F: FnMut(T) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let (tx, mut rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Some(operation) = rx.recv().await {
            perform(operation).await;
        }
    });
    tx
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_operations_run_in_submission_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let (done_tx, mut done_rx) = mpsc::unbounded_channel();

        let recorded = Arc::clone(&log);
        let queue = spawn_serial(move |(name, delay_ms): (&'static str, u64)| {
            let recorded = Arc::clone(&recorded);
            let done = done_tx.clone();
            async move {
                recorded.lock().unwrap().push(format!("start {name}"));
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                recorded.lock().unwrap().push(format!("end {name}"));
                let _ = done.send(());
            }
        });

        // 先提交的慢操作必须在后提交的快操作之前完成
        queue.send(("first", 50)).unwrap();
        queue.send(("second", 0)).unwrap();
        queue.send(("third", 10)).unwrap();
        for _ in 0..3 {
            done_rx.recv().await.unwrap();
        }

        assert_eq!(
            *log.lock().unwrap(),
            vec![
                "start first",
                "end first",
                "start second",
                "end second",
                "start third",
                "end third"
            ]
        );
    }

    #[tokio::test]
    async fn test_queue_stops_when_senders_dropped() {
        let (done_tx, mut done_rx) = mpsc::unbounded_channel::<()>();
        let queue = spawn_serial(move |(): ()| {
            let done = done_tx.clone();
            async move {
                let _ = done.send(());
            }
        });
        queue.send(()).unwrap();
        done_rx.recv().await.unwrap();

        drop(queue);
        // 任务退出后闭包（及其持有的发送端）被释放
        assert!(done_rx.recv().await.is_none());
    }
}
