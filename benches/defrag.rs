//! Benchmarks for fragment reassembly.
//!
//! Run with: cargo bench --bench defrag

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use weft::packet::{Fragment, Packet, Verb};
use weft::switch::{DefragQueue, IncomingPacket};
use weft::Address;

fn fragment_set(total: u8) -> (IncomingPacket, Vec<Fragment>) {
    let dest = Address::from_u64(0x2222222222);
    let src = Address::from_u64(0x1111111111);
    // Sized so even the 15-fragment case stays under the packet length cap.
    let chunk = 256;

    let mut packet = Packet::new(dest, src, Verb::Frame);
    packet.set_fragmented(true);
    let head = IncomingPacket::new(packet.clone(), 1, "192.0.2.1:9993".parse().unwrap(), 0);

    let body = vec![0xabu8; chunk];
    let fragments = (1..total)
        .map(|i| Fragment::new(packet.packet_id(), dest, i, total, &body))
        .collect();
    (head, fragments)
}

fn bench_reassembly(c: &mut Criterion) {
    let mut group = c.benchmark_group("defrag_reassemble");

    for &total in &[2u8, 4, 8, 15] {
        group.bench_with_input(BenchmarkId::from_parameter(total), &total, |b, &total| {
            b.iter_batched(
                || fragment_set(total),
                |(head, fragments)| {
                    let mut queue = DefragQueue::new();
                    queue.insert_head(head, 0);
                    let mut assembled = None;
                    for fragment in &fragments {
                        assembled = queue.insert_fragment(black_box(fragment), 0);
                    }
                    assert!(assembled.is_some());
                    assembled
                },
                criterion::BatchSize::SmallInput,
            )
        });
    }
    group.finish();
}

fn bench_out_of_order(c: &mut Criterion) {
    c.bench_function("defrag_reverse_order", |b| {
        b.iter_batched(
            || fragment_set(8),
            |(head, fragments)| {
                let mut queue = DefragQueue::new();
                let mut assembled = None;
                for fragment in fragments.iter().rev() {
                    assembled = queue.insert_fragment(black_box(fragment), 0);
                }
                assert!(assembled.is_none());
                queue.insert_head(head, 0)
            },
            criterion::BatchSize::SmallInput,
        )
    });
}

criterion_group!(benches, bench_reassembly, bench_out_of_order);
criterion_main!(benches);
