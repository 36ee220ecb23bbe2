//! Atomic rewrite tests: what queued operations observe around a rewrite.

#[cfg(test)]
mod tests {
  use std::{sync::Arc, time::Duration};

  use pretty_assertions::assert_eq;
  use rowfile_core::StoreConfig;
  use tokio::sync::Notify;

  use crate::{LineEdit, __tests__::helpers::StoreTestContext};

  /// Test: operations queued behind a rewrite only see the finished file.
  #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
  async fn test_queued_operations_see_finished_rewrite() {
    let ctx = StoreTestContext::with_config(StoreConfig {
      chunk_size: 8,
      rewrite_buffer: 2,
      ..StoreConfig::default()
    });
    let content: String = (1..=50).map(|i| format!("{{\"id\":{i}}}\n")).collect();
    ctx.write_file("t.bson", &content);
    let file = ctx.handle("t.bson");

    let rewrite = file.replace_each_line(|line| {
      Ok(if line.ends_with("0}") {
        LineEdit::Delete
      } else {
        LineEdit::Keep
      })
    });
    let exists = file.exists();
    let read = file.read();
    let append = file.append_line("{\"id\":51}");
    let read_after_append = file.read();

    let read_after_append = tokio::spawn(read_after_append);
    let read = tokio::spawn(read);
    let append = tokio::spawn(append);
    let exists = tokio::spawn(exists);

    rewrite.await.unwrap();
    assert!(exists.await.unwrap());
    append.await.unwrap().unwrap();

    let expected: String = (1..=50)
      .filter(|i| i % 10 != 0)
      .map(|i| format!("{{\"id\":{i}}}\n"))
      .collect();
    assert_eq!(read.await.unwrap().unwrap(), expected);
    assert_eq!(
      read_after_append.await.unwrap().unwrap(),
      format!("{expected}{{\"id\":51}}\n")
    );
    assert!(!ctx.path("t.bson_temp").exists());
  }

  /// Test: the temp file goes through the registry like any other path.
  #[tokio::test]
  async fn test_temp_path_gets_registry_handle() {
    let ctx = StoreTestContext::new();
    ctx.write_file("t.bson", "a\n");
    let file = ctx.handle("t.bson");

    file.replace_each_line(|_| Ok(LineEdit::Keep)).await.unwrap();

    let temp = ctx.registry.get(ctx.path("t.bson_temp")).expect("temp handle registered");
    assert!(!temp.exists().await);
    assert_eq!(temp.pending(), 0);
  }

  /// Test: a custom temp suffix is honoured and a stale temp blocks the pass.
  #[tokio::test]
  async fn test_custom_temp_suffix() {
    let ctx = StoreTestContext::with_config(StoreConfig {
      temp_suffix: ".swap".to_string(),
      ..StoreConfig::default()
    });
    ctx.write_file("t.bson", "a\n");
    ctx.write_file("t.bson.swap", "stale\n");
    let file = ctx.handle("t.bson");

    let err = file.replace_each_line(|_| Ok(LineEdit::Keep)).await.unwrap_err();
    assert!(matches!(err, crate::StoreError::TempExists(_)));

    std::fs::remove_file(ctx.path("t.bson.swap")).unwrap();
    file
      .replace_each_line(|_| Ok(LineEdit::Replace("b".to_string())))
      .await
      .unwrap();
    assert_eq!(ctx.read_file("t.bson"), "b\n");
  }

  /// Test: dropping a rewrite midway puts the original file back.
  #[tokio::test]
  async fn test_cancelled_rewrite_restores_original() {
    let ctx = StoreTestContext::with_config(StoreConfig {
      chunk_size: 8,
      rewrite_buffer: 1,
      ..StoreConfig::default()
    });
    let content: String = (1..=2000).map(|i| format!("{{\"id\":{i}}}\n")).collect();
    ctx.write_file("t.bson", &content);
    let file = ctx.handle("t.bson");

    let stop = Arc::new(Notify::new());
    let rewrite = file.replace_each_line({
      let stop = stop.clone();
      let mut seen = 0;
      move |_| {
        seen += 1;
        if seen == 100 {
          stop.notify_one();
        }
        Ok(LineEdit::Delete)
      }
    });
    let read = tokio::spawn(file.read());

    let cancelled = tokio::select! {
      biased;
      _ = stop.notified() => true,
      _ = rewrite => false,
    };
    assert!(cancelled, "rewrite finished before it could be dropped");

    assert_eq!(read.await.unwrap().unwrap(), content);
    assert!(!ctx.path("t.bson_temp").exists());

    file
      .replace_each_line(|line| {
        Ok(if line == "{\"id\":1}" {
          LineEdit::Keep
        } else {
          LineEdit::End
        })
      })
      .await
      .unwrap();
    assert_eq!(ctx.read_file("t.bson"), "{\"id\":1}\n");
  }

  /// Test: a rewrite cut off by a timeout leaves either the old or the new file.
  #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
  async fn test_timed_out_rewrite_leaves_whole_file() {
    let ctx = StoreTestContext::with_config(StoreConfig {
      chunk_size: 8,
      rewrite_buffer: 1,
      ..StoreConfig::default()
    });
    let content: String = (1..=2000).map(|i| format!("{{\"id\":{i}}}\n")).collect();
    ctx.write_file("t.bson", &content);
    let file = ctx.handle("t.bson");

    let rewrite = file.replace_each_line(|_| Ok(LineEdit::Delete));
    let read = tokio::spawn(file.read());
    let finished = tokio::time::timeout(Duration::from_millis(5), rewrite).await.is_ok();

    let after = read.await.unwrap().unwrap();
    if finished {
      assert_eq!(after, "");
    } else {
      assert_eq!(after, content);
    }
    assert!(!ctx.path("t.bson_temp").exists());
    file.replace_each_line(|_| Ok(LineEdit::Keep)).await.unwrap();
  }
}
