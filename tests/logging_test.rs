mod common;

use std::io::Write;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use common::{test_service, Travellers};
use tracing_subscriber::fmt::MakeWriter;
use travelbook::domain::ExpenseHeader;

/// Collects formatted log lines in memory
#[derive(Clone, Default)]
struct Captured(Arc<Mutex<Vec<u8>>>);

impl Captured {
    fn take(&self) -> String {
        let mut buffer = self.0.lock().unwrap();
        String::from_utf8(std::mem::take(&mut *buffer)).unwrap()
    }
}

impl Write for Captured {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for Captured {
    type Writer = Captured;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

#[tokio::test]
async fn test_transactions_are_logged() -> Result<()> {
    let captured = Captured::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(captured.clone())
        .with_max_level(tracing::Level::DEBUG)
        .with_ansi(false)
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let (service, _temp) = test_service().await?;
    let t = Travellers::create(&service).await?;
    captured.take();

    t.expense(&service, "Dinner", 4000, vec![t.ana]).await?;
    let logs = captured.take();
    assert!(logs.contains("Transaction started"));
    assert!(logs.contains("Transaction committed"));
    assert!(logs.contains("Expense created"));
    assert!(!logs.contains("Transaction rolled back"));

    let header = ExpenseHeader::new("Hotel", 24000);
    assert!(service.create_expense(&header, 9999).await.is_err());
    let logs = captured.take();
    assert!(logs.contains("Transaction rolled back"));
    assert!(!logs.contains("Transaction committed"));

    Ok(())
}
