use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::NaiveDate;
use rust_decimal::Decimal;
use ulid::Ulid;

use salon_ledger::clock::ManualClock;
use salon_ledger::engine::{Engine, EngineError, NewAppointment, NewBookingRequest, NewPayment};
use salon_ledger::model::*;
use salon_ledger::store::JournaledStore;

const HOUR: i64 = 3_600_000; // 1 hour in ms

type Bench = Arc<Engine<JournaledStore>>;

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
    if latencies.is_empty() {
        println!("  {label}: no samples");
        return;
    }
    latencies.sort();
    let total: Duration = latencies.iter().sum();
    let avg = total / latencies.len() as u32;
    println!("  {label}:");
    println!(
        "    n={}, avg={:.3}ms, p50={:.3}ms, p95={:.3}ms, p99={:.3}ms, max={:.3}ms",
        latencies.len(),
        avg.as_secs_f64() * 1000.0,
        percentile(latencies, 50.0).as_secs_f64() * 1000.0,
        percentile(latencies, 95.0).as_secs_f64() * 1000.0,
        percentile(latencies, 99.0).as_secs_f64() * 1000.0,
        latencies[latencies.len() - 1].as_secs_f64() * 1000.0,
    );
}

fn first_day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 1, 5).unwrap()
}

/// Start of working hour `hour` on the `day`-th day of the run.
fn slot(day: i64, hour: i64) -> Ms {
    day_start(first_day()) + day * DAY_MS + hour * HOUR
}

struct Salon {
    id: Ulid,
    professionals: Vec<Ulid>,
    service: Service,
}

async fn setup(store: &JournaledStore, n_professionals: usize) -> Salon {
    let id = Ulid::new();
    let service = store
        .register_service(Service {
            id: Ulid::new(),
            salon_id: id,
            name: "Cut".into(),
            duration_minutes: 60,
            price: Decimal::new(80, 0),
        })
        .await
        .unwrap();
    let mut professionals = Vec::new();
    for i in 0..n_professionals {
        let professional = store
            .register_professional(Professional {
                id: Ulid::new(),
                salon_id: id,
                name: format!("pro-{i}"),
                work_window: WorkWindow::hours(8, 18),
                commission_percentage: Decimal::new(35, 0),
            })
            .await
            .unwrap();
        professionals.push(professional.id);
    }
    println!("  salon with {n_professionals} professionals");
    Salon {
        id,
        professionals,
        service,
    }
}

fn request(salon: &Salon, professional_id: Ulid, start: Ms) -> NewBookingRequest {
    NewBookingRequest {
        salon_id: salon.id,
        professional_id,
        service_id: salon.service.id,
        requested_start: start,
        client: ClientInfo {
            name: "Bench".into(),
            phone: "000".into(),
            email: None,
        },
        notes: None,
    }
}

async fn phase1_sequential(engine: &Bench, salon: &Salon) {
    let professional_id = salon.professionals[0];
    let n = 2000;
    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();

    for i in 0..n as i64 {
        let input = NewAppointment {
            salon_id: salon.id,
            professional_id,
            service_id: salon.service.id,
            start: slot(i / 10, 8 + i % 10),
            client: ClientRef::Registered(Ulid::new()),
            notes: None,
            status: AppointmentStatus::Confirmed,
            created_by: Ulid::new(),
        };
        let t = Instant::now();
        engine.create_appointment(input).await.unwrap();
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} bookings in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("direct booking latency", &mut latencies);
}

/// Many approvals racing for the same hour of the same professional. Exactly
/// one per hour may win.
async fn phase2_contended_approvals(engine: &Bench, salon: &Salon) {
    let racers = 16;
    let hours = 10;
    let mut handles = Vec::new();
    let start = Instant::now();

    for (p, &professional_id) in salon.professionals.iter().enumerate().skip(1) {
        for hour in 0..hours {
            let mut ids = Vec::with_capacity(racers);
            for _ in 0..racers {
                let at = slot(300 + p as i64, 8 + hour);
                let pending = engine.submit_request(request(salon, professional_id, at)).await.unwrap();
                ids.push(pending.id);
            }
            for id in ids {
                let engine = engine.clone();
                let salon_id = salon.id;
                handles.push(tokio::spawn(async move {
                    let t = Instant::now();
                    let result = engine.approve_request(salon_id, id, Ulid::new()).await;
                    (t.elapsed(), result.map(|_| ()))
                }));
            }
        }
    }

    let mut latencies = Vec::with_capacity(handles.len());
    let (mut won, mut conflicts) = (0usize, 0usize);
    for h in handles {
        let (latency, result) = h.await.unwrap();
        latencies.push(latency);
        match result {
            Ok(()) => won += 1,
            Err(EngineError::SlotConflict(_)) => conflicts += 1,
            Err(e) => panic!("unexpected approval error: {e}"),
        }
    }

    let contested = (salon.professionals.len() - 1) * hours as usize;
    println!(
        "  {} approvals over {contested} contested hours in {:.2}s: {won} won, {conflicts} conflicts",
        latencies.len(),
        start.elapsed().as_secs_f64()
    );
    assert_eq!(won, contested, "double booking detected");
    print_latency("approval latency", &mut latencies);
}

async fn phase3_availability_under_load(engine: &Bench, salon: &Salon) {
    let stop = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let mut writers = Vec::new();
    for (w, &professional_id) in salon.professionals.iter().enumerate().skip(1).take(4) {
        let engine = engine.clone();
        let stop = stop.clone();
        let (salon_id, service_id) = (salon.id, salon.service.id);
        writers.push(tokio::spawn(async move {
            let mut i = 0i64;
            while !stop.load(std::sync::atomic::Ordering::Relaxed) && i < 1000 {
                let input = NewAppointment {
                    salon_id,
                    professional_id,
                    service_id,
                    start: slot(i / 10 + 10 * w as i64, 8 + i % 10),
                    client: ClientRef::Registered(Ulid::new()),
                    notes: None,
                    status: AppointmentStatus::Pending,
                    created_by: Ulid::new(),
                };
                let _ = engine.create_appointment(input).await;
                i += 1;
            }
        }));
    }

    let professional_id = salon.professionals[0];
    let service_id = salon.service.id;
    let mut readers = Vec::new();
    for r in 0..10 {
        let engine = engine.clone();
        let salon_id = salon.id;
        readers.push(tokio::spawn(async move {
            let mut latencies = Vec::with_capacity(500);
            for i in 0..500u64 {
                let date = first_day() + chrono::Days::new((r * 500 + i) % 200);
                let t = Instant::now();
                engine
                    .available_slots(salon_id, professional_id, service_id, date)
                    .await
                    .unwrap();
                latencies.push(t.elapsed());
            }
            latencies
        }));
    }

    let mut all = Vec::new();
    for h in readers {
        all.extend(h.await.unwrap());
    }
    stop.store(true, std::sync::atomic::Ordering::Relaxed);
    for h in writers {
        let _ = h.await;
    }
    print_latency("availability query", &mut all);
}

async fn phase4_settlement(engine: &Bench, clock: &ManualClock, salon: &Salon) {
    let professional_id = salon.professionals[0];
    let range = Span::new(slot(0, 0), slot(30, 0));
    let open = engine
        .list_appointments(salon.id, professional_id, range, &[AppointmentStatus::Confirmed])
        .await
        .unwrap();

    clock.set(slot(31, 0));
    let mut latencies = Vec::with_capacity(open.len());
    let mut ledger = None;
    for appointment in &open {
        let t = Instant::now();
        let done = engine.complete_appointment(salon.id, appointment.id).await.unwrap();
        latencies.push(t.elapsed());
        ledger = Some(done.commission);
    }
    print_latency("complete + recompute", &mut latencies);

    let Some(row) = ledger else { return };
    let mut latencies = Vec::with_capacity(100);
    for _ in 0..100 {
        let payment = NewPayment {
            amount: Decimal::new(150, 2),
            method: PaymentMethod::Cash,
            notes: None,
            recorded_by: Ulid::new(),
        };
        let t = Instant::now();
        engine.register_payment(salon.id, row.id, payment).await.unwrap();
        latencies.push(t.elapsed());
    }
    print_latency("register payment", &mut latencies);

    let row = engine.get_commission_by_id(salon.id, row.id).await.unwrap();
    println!(
        "  ledger {}: {} appointments, total {}, paid {}, balance {} ({})",
        row.period,
        row.total_appointments,
        row.commission_total,
        row.amount_paid,
        row.balance_due,
        row.status.as_str()
    );
}

#[tokio::main]
async fn main() {
    let dir = std::env::temp_dir().join(format!("salon_ledger_bench_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("bench.wal");

    println!("=== salon-ledger stress benchmark ===");
    println!("journal: {}\n", path.display());

    let store = Arc::new(JournaledStore::open(&path).unwrap());
    // The run books into the future relative to this instant
    let clock = Arc::new(ManualClock::new(slot(-1, 0)));
    let engine: Bench = Arc::new(Engine::new(store.clone(), clock.clone()));

    println!("[setup]");
    let salon = setup(&store, 9).await;

    println!("\n[phase 1] sequential direct bookings");
    phase1_sequential(&engine, &salon).await;

    println!("\n[phase 2] contended approvals");
    phase2_contended_approvals(&engine, &salon).await;

    println!("\n[phase 3] availability under write load");
    phase3_availability_under_load(&engine, &salon).await;

    println!("\n[phase 4] settlement");
    phase4_settlement(&engine, &clock, &salon).await;

    println!("\n[compaction]");
    let t = Instant::now();
    let events = store.compact().await.unwrap();
    println!("  {events} events in {:.2}ms", t.elapsed().as_secs_f64() * 1000.0);

    let _ = std::fs::remove_dir_all(&dir);
}
