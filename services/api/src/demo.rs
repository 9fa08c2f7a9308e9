use crate::infra::{seed_demo_portfolio, DEMO_PROPERTY};
use clap::Args;
use std::sync::Arc;
use std::time::Duration;
use tenancy_core::error::AppError;
use tenancy_core::tenancy::{
    ApplicationId, InMemoryStore, PropertyId, RecordingChangeFeed, RetryPolicy, Tenancy,
    TenancyLifecycleService, TenancyStores, UnitFilter, UnitId, WorkflowError, WorkflowSettings,
};

#[derive(Args, Debug, Default)]
pub(crate) struct DemoArgs {
    /// Print each change-feed event as a JSON payload instead of its type.
    #[arg(long)]
    pub(crate) json_events: bool,
    /// Skip the race between two applicants for the same unit.
    #[arg(long)]
    pub(crate) skip_race: bool,
}

pub(crate) async fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let store = Arc::new(InMemoryStore::new());
    let stores = TenancyStores::shared(store.clone());
    seed_demo_portfolio(&stores).await?;

    let feed = RecordingChangeFeed::default();
    let settings = WorkflowSettings {
        retry: RetryPolicy::new(3, Duration::from_millis(10)),
        release_retry: RetryPolicy::new(5, Duration::from_millis(10)),
        ..WorkflowSettings::default()
    };
    let service = TenancyLifecycleService::new(stores, Arc::new(feed.clone()), settings);
    let property = PropertyId::from(DEMO_PROPERTY);

    println!("Tenancy lifecycle demo");
    println!(
        "Property {}: {} vacant units, lease term {} days, deposit {} month(s) of rent",
        property,
        service.vacant_units(&property).await?.len(),
        settings.lease_days,
        settings.deposit_months
    );

    println!("\nAssignment");
    let first = if args.skip_race {
        let tenancy = service
            .assign(&ApplicationId::from("app-1001"), &UnitId::from("maple-101"))
            .await?;
        print_tenancy("  app-1001 housed", &tenancy);
        tenancy
    } else {
        race_for_unit(&service).await?
    };

    let second = service
        .assign(&ApplicationId::from("app-1002"), &UnitId::from("maple-102"))
        .await;
    report("  app-1002 -> maple-102", second);

    println!("\nUnit change");
    let occupied = service
        .change_unit(&first.id, &UnitId::from("maple-102"))
        .await;
    report("  move to maple-102 (occupied)", occupied);
    let moved = service
        .change_unit(&first.id, &UnitId::from("maple-201"))
        .await;
    report("  move to maple-201", moved);

    println!("\nRejection");
    match service.reject(&ApplicationId::from("app-1003")).await {
        Ok(()) => println!("  app-1003 rejected"),
        Err(err) => println!("  app-1003 not rejected: {err}"),
    }
    let rejected_assign = service
        .assign(&ApplicationId::from("app-1003"), &UnitId::from("maple-202"))
        .await;
    report("  app-1003 -> maple-202", rejected_assign);

    println!("\nMove-out");
    let ended = service.end_tenancy(&first.id).await;
    report("  end tenancy", ended);
    let ended_again = service.end_tenancy(&first.id).await;
    report("  end tenancy again", ended_again);

    println!("\nUnits");
    let units = service
        .list_units(&UnitFilter {
            property_id: Some(property.clone()),
            status: None,
        })
        .await?;
    for unit in units {
        println!(
            "- {} (#{}) {:>9} {}",
            unit.id,
            unit.unit_number,
            format_cents(unit.monthly_rent),
            unit.status.label()
        );
    }

    println!("\nChange feed");
    for event in feed.events() {
        if args.json_events {
            match serde_json::to_string(&event) {
                Ok(payload) => println!("- {payload}"),
                Err(err) => println!("- {} (payload unavailable: {err})", event.event_type()),
            }
        } else {
            println!("- {}", event.event_type());
        }
    }

    let findings = service.audit_occupancy().await?;
    if findings.is_empty() {
        println!("\nOccupancy audit: consistent");
    } else {
        println!("\nOccupancy audit");
        for finding in findings {
            println!("- {finding:?}");
        }
    }
    println!("Tenant profiles created: {}", store.profile_count());

    Ok(())
}

async fn race_for_unit(service: &TenancyLifecycleService) -> Result<Tenancy, WorkflowError> {
    let unit = UnitId::from("maple-101");
    let jordan = ApplicationId::from("app-1001");
    let jordan_again = ApplicationId::from("app-1004");

    println!("  app-1001 and app-1004 (same applicant) both request {unit}");
    let (left, right) = tokio::join!(
        service.assign(&jordan, &unit),
        service.assign(&jordan_again, &unit)
    );

    let mut winner = None;
    for (application, outcome) in [(&jordan, left), (&jordan_again, right)] {
        match outcome {
            Ok(tenancy) => {
                print_tenancy(&format!("  {application} housed"), &tenancy);
                winner = Some(tenancy);
            }
            Err(err) => println!("  {application} lost the race: {err}"),
        }
    }

    match winner {
        Some(tenancy) => Ok(tenancy),
        None => {
            let fallback = service.assign(&jordan, &UnitId::from("maple-202")).await?;
            print_tenancy("  app-1001 housed after retry", &fallback);
            Ok(fallback)
        }
    }
}

fn report(label: &str, outcome: Result<Tenancy, WorkflowError>) {
    match outcome {
        Ok(tenancy) => print_tenancy(label, &tenancy),
        Err(err) => println!("{label}: refused ({:?}) {err}", err.kind()),
    }
}

fn print_tenancy(label: &str, tenancy: &Tenancy) {
    println!(
        "{label}: {} on {} [{:?}] {} to {}, rent {}, deposit {}",
        tenancy.id,
        tenancy.unit_id,
        tenancy.status,
        tenancy.lease_start.format("%Y-%m-%d"),
        tenancy.lease_end.format("%Y-%m-%d"),
        format_cents(tenancy.monthly_rent),
        format_cents(tenancy.security_deposit)
    );
}

fn format_cents(amount: u32) -> String {
    format!("${}.{:02}", amount / 100, amount % 100)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cents_render_as_dollars() {
        assert_eq!(format_cents(112_500), "$1125.00");
        assert_eq!(format_cents(95_005), "$950.05");
    }

    #[tokio::test]
    async fn demo_runs_against_sample_portfolio() {
        run_demo(DemoArgs::default()).await.expect("demo completes");
    }
}
