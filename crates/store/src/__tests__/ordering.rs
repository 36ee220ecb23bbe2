//! Queue discipline tests: call order, mutual exclusion and recovery.

#[cfg(test)]
mod tests {
  use std::time::Duration;

  use pretty_assertions::assert_eq;

  use crate::{
    StoreError,
    __tests__::helpers::{EventLog, StoreTestContext},
  };

  // ==========================================================================
  // Ordering
  // ==========================================================================

  /// Test: slots reserved in order run in order, even when polled in reverse.
  #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
  async fn test_operations_run_in_call_order_without_overlap() {
    let ctx = StoreTestContext::new();
    let file = ctx.handle("ordered.txt");
    let log = EventLog::default();

    let mut operations = Vec::new();
    for i in 0..20 {
      let lock = file.lock();
      let log = log.clone();
      operations.push(async move {
        let exclusive = lock.await;
        log.push(format!("start {i}"));
        tokio::task::yield_now().await;
        exclusive.append_line(&i.to_string()).await?;
        log.push(format!("end {i}"));
        Ok::<_, StoreError>(())
      });
    }

    let tasks: Vec<_> = operations.into_iter().rev().map(tokio::spawn).collect();
    for task in tasks {
      task.await.expect("task panicked").expect("operation failed");
    }

    let expected: Vec<String> = (0..20)
      .flat_map(|i| [format!("start {i}"), format!("end {i}")])
      .collect();
    assert_eq!(log.events(), expected);

    let expected_file: String = (0..20).map(|i| format!("{i}\n")).collect();
    assert_eq!(ctx.read_file("ordered.txt"), expected_file);
  }

  /// Test: public operations observe the effects of everything called before them.
  #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
  async fn test_public_operations_follow_call_order() {
    let ctx = StoreTestContext::new();
    let file = ctx.handle("ops.txt");

    let write = file.write("a");
    let append = file.append("b");
    let read = file.read();
    let append_line = file.append_line("c");
    let read_again = file.read();

    // Spawn out of order on purpose
    let read_again = tokio::spawn(read_again);
    let read = tokio::spawn(read);
    let append_line = tokio::spawn(append_line);
    let append = tokio::spawn(append);
    let write = tokio::spawn(write);

    write.await.unwrap().unwrap();
    append.await.unwrap().unwrap();
    append_line.await.unwrap().unwrap();
    assert_eq!(read.await.unwrap().unwrap(), "ab");
    assert_eq!(read_again.await.unwrap().unwrap(), "ab\nc\n");
  }

  /// Test: each path has its own queue.
  #[tokio::test]
  async fn test_different_paths_do_not_block_each_other() {
    let ctx = StoreTestContext::new();
    let busy = ctx.handle("busy.txt");
    let free = ctx.handle("free.txt");

    let _held = busy.lock().await;
    tokio::time::timeout(Duration::from_secs(5), free.write("ok"))
      .await
      .expect("operation on another path should not wait")
      .unwrap();
    assert_eq!(busy.pending(), 1);
  }

  // ==========================================================================
  // Recovery
  // ==========================================================================

  /// Test: aborting a task that waits for the slot does not stall the queue.
  #[tokio::test]
  async fn test_aborted_waiter_is_skipped() {
    let ctx = StoreTestContext::new();
    let file = ctx.handle("abort.txt");

    let held = file.lock().await;
    let waiting = tokio::spawn(file.write("never"));
    let after = file.write("after");

    // Let the spawned task park on its slot before aborting it
    tokio::task::yield_now().await;
    waiting.abort();
    let _ = waiting.await;
    drop(held);

    tokio::time::timeout(Duration::from_secs(5), after)
      .await
      .expect("queue stalled")
      .unwrap();
    assert_eq!(ctx.read_file("abort.txt"), "after");
    assert_eq!(file.pending(), 0);
  }

  /// Test: a failing operation hands the slot on like any other.
  #[tokio::test]
  async fn test_failures_do_not_abort_queue() {
    let ctx = StoreTestContext::new();
    let file = ctx.handle("missing.txt");

    let read = file.read();
    let unlink = file.unlink();
    let write = file.write("recovered");

    assert!(read.await.unwrap_err().is_not_found());
    assert!(unlink.await.unwrap_err().is_not_found());
    write.await.unwrap();
    assert_eq!(ctx.read_file("missing.txt"), "recovered");
  }

  /// Test: idle resolves only once queued work has drained.
  #[tokio::test]
  async fn test_idle_waits_for_queue() {
    let ctx = StoreTestContext::new();
    let file = ctx.handle("idle.txt");
    let log = EventLog::default();

    let held = file.lock().await;
    let idle = {
      let file = file.clone();
      let log = log.clone();
      tokio::spawn(async move {
        file.idle().await;
        log.push("idle");
      })
    };
    let write = {
      let write = file.write("x");
      let log = log.clone();
      tokio::spawn(async move {
        write.await.unwrap();
        log.push("written");
      })
    };

    tokio::task::yield_now().await;
    assert!(log.events().is_empty());

    drop(held);
    write.await.unwrap();
    idle.await.unwrap();
    assert_eq!(log.events(), vec!["written", "idle"]);

    // Already idle resolves immediately
    ctx.registry.idle().await;
  }
}
