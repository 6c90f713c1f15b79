//! Wire codec and affinity hashing throughput benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use ignite_core::partition::partition_for_hash;
use ignite_core::serialization::{ByteOrder, ComplexType, TypeCode, WireValue};

fn bench_value_encoding(c: &mut Criterion) {
    let mut group = c.benchmark_group("value_encoding");

    let values = [
        ("int", WireValue::Int(42)),
        ("long", WireValue::Long(123_456_789)),
        ("string", WireValue::String("the quick brown fox".into())),
        (
            "string_array",
            WireValue::StringArray((0..32).map(|i| Some(format!("item-{}", i))).collect()),
        ),
    ];

    for (name, value) in &values {
        group.bench_with_input(BenchmarkId::new("encode", name), value, |b, v| {
            b.iter(|| black_box(v.encode(ByteOrder::LittleEndian).unwrap()))
        });
        let bytes = value.encode(ByteOrder::LittleEndian).unwrap();
        group.bench_with_input(BenchmarkId::new("decode", name), &bytes, |b, bytes| {
            b.iter(|| black_box(WireValue::decode(bytes, ByteOrder::LittleEndian).unwrap()))
        });
    }

    group.finish();
}

fn bench_complex_objects(c: &mut Criterion) {
    let mut group = c.benchmark_group("complex_objects");

    let ty = ComplexType::builder("Person")
        .field("id", TypeCode::Long)
        .field("name", TypeCode::String)
        .field("age", TypeCode::Int)
        .field("tags", TypeCode::StringArray)
        .build()
        .unwrap();
    let values = vec![
        WireValue::Long(1),
        WireValue::String("Ann".into()),
        WireValue::Int(41),
        WireValue::StringArray(vec![Some("a".into()), Some("b".into())]),
    ];

    group.bench_function("encode", |b| {
        b.iter(|| black_box(ty.encode(values.clone(), ByteOrder::LittleEndian).unwrap()))
    });

    let obj = ty.encode(values.clone(), ByteOrder::LittleEndian).unwrap();
    group.throughput(Throughput::Bytes(obj.len() as u64));
    group.bench_function("single_field", |b| {
        b.iter(|| black_box(obj.field_by_name("age").unwrap()))
    });
    group.bench_function("all_fields", |b| b.iter(|| black_box(obj.fields().unwrap())));

    group.finish();
}

fn bench_affinity(c: &mut Criterion) {
    let mut group = c.benchmark_group("affinity");

    let keys: Vec<WireValue> = (0..1000)
        .map(|i| WireValue::String(format!("key-{}", i)))
        .collect();
    group.throughput(Throughput::Elements(keys.len() as u64));
    for parts in [271usize, 1024] {
        group.bench_with_input(BenchmarkId::new("partition", parts), &parts, |b, &parts| {
            b.iter(|| {
                for key in &keys {
                    let hash = key.hash_code().unwrap();
                    black_box(partition_for_hash(hash, parts).unwrap());
                }
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_value_encoding, bench_complex_objects, bench_affinity);
criterion_main!(benches);
