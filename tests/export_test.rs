mod common;

use anyhow::Result;
use common::{test_service, Travellers};
use travelbook::domain::ExpenseHeader;
use travelbook::io::{Exporter, TripSnapshot};

#[tokio::test]
async fn test_export_trip_csv() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let t = Travellers::create(&service).await?;

    let header = ExpenseHeader::new("Dinner, with wine", 4550)
        .with_location("Bairro Alto")
        .with_participants(vec![t.ana, t.bo]);
    service.create_expense(&header, t.trip).await?;
    t.expense(&service, "Museum", 1200, vec![]).await?;

    let mut buffer = Vec::new();
    let count = Exporter::new(&service)
        .export_trip_csv(t.trip, &mut buffer)
        .await?;
    assert_eq!(count, 2);

    let output = String::from_utf8(buffer)?;
    let lines: Vec<&str> = output.lines().collect();
    assert_eq!(lines[0], "id,trip_id,location,name,description,price,participants");
    assert!(lines[1].contains("\"Dinner, with wine\""));
    assert!(lines[1].contains("45.50"));
    assert!(lines[1].ends_with(&format!("{};{}", t.ana, t.bo)));
    assert!(lines[2].contains("Museum"));
    assert!(lines[2].ends_with("12.00,"));

    Ok(())
}

#[tokio::test]
async fn test_export_trip_json() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let t = Travellers::create(&service).await?;

    t.expense(&service, "Tram 28", 900, vec![t.ana, t.bo, t.cy]).await?;

    let mut buffer = Vec::new();
    let snapshot = Exporter::new(&service)
        .export_trip_json(t.trip, &mut buffer)
        .await?;
    assert_eq!(snapshot.expenses.len(), 1);

    let parsed: TripSnapshot = serde_json::from_slice(&buffer)?;
    assert_eq!(parsed.trip.id, t.trip);
    assert_eq!(parsed.members.len(), 1);
    assert_eq!(parsed.expenses[0].name, "Tram 28");
    assert_eq!(parsed.shares.total, 900);
    assert_eq!(parsed.shares.shares.len(), 3);

    Ok(())
}

#[tokio::test]
async fn test_export_unknown_trip_fails() -> Result<()> {
    let (service, _temp) = test_service().await?;

    let result = Exporter::new(&service)
        .export_trip_csv(99, Vec::new())
        .await;
    assert!(result.is_err());

    Ok(())
}
