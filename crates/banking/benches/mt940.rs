use std::collections::HashSet;

use chrono::Utc;
use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use uuid::Uuid;

use kontor_banking::mt940;
use kontor_banking::{BankAccountId, ImportContext, prepare_import};
use kontor_core::{AggregateId, Currency, TenantId};

/// A statement file with `lines` bookings, every third one a structured `:86:`.
fn statement_file(lines: usize) -> String {
    let mut out = String::from(":20:BENCH\n:25:DE02120300000000202051\n:28C:00001/001\n:60F:C240101EUR0,00\n");
    let mut total: i64 = 0;
    for i in 0..lines {
        let cents = 1_000 + (i as i64 % 97) * 13;
        total += cents;
        let day = 1 + (i % 28);
        out.push_str(&format!(":61:2401{day:02}01{day:02}CR{},{:02}NTRFREF-{i}//B{i}\n", cents / 100, cents % 100));
        if i % 3 == 0 {
            out.push_str(&format!(
                ":86:166?00GUTSCHRIFT?20Rechnung RE-2024-{i:04}?21Kunde {i}?30BYLADEMM?31DE02120300000000202051?32Kunde Nummer {i}\n"
            ));
        } else {
            out.push_str(&format!(":86:Zahlung {i} Rechnung RE-2024-{i:04}\n"));
        }
    }
    out.push_str(&format!(":62F:C240128EUR{},{:02}\n-\n", total / 100, total % 100));
    out
}

fn bench_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("mt940_parse");
    for lines in [10usize, 100, 1_000] {
        let file = statement_file(lines);
        group.throughput(Throughput::Bytes(file.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(lines), &file, |b, file| {
            b.iter(|| mt940::parse(black_box(file)).map(|s| s.len()))
        });
    }
    group.finish();
}

fn bench_import(c: &mut Criterion) {
    let file = statement_file(1_000);
    let statements = mt940::parse(&file).unwrap_or_default();
    let existing = HashSet::new();
    let ctx = ImportContext {
        tenant_id: TenantId::new(),
        account_id: BankAccountId::new(AggregateId::new()),
        currency: Currency::EUR,
        existing_hashes: &existing,
        batch_id: Uuid::now_v7(),
        now: Utc::now(),
    };
    c.bench_function("prepare_import_1000", |b| {
        b.iter(|| prepare_import(black_box(&ctx), black_box(&statements)).map(|p| p.summary.imported))
    });
}

criterion_group!(benches, bench_parse, bench_import);
criterion_main!(benches);
