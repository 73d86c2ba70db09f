use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use rtcast_protocol::chunk::{chunk_frame, ChunkHeader, FrameAssembler, MAX_CHUNK_DATA};
use rtcast_protocol::packet::{Packet, PacketType};
use rtcast_protocol::CHUNK_HEADER_SIZE;

fn bench_packet_serialize(c: &mut Criterion) {
    let payload = Bytes::from(vec![0u8; 1400]);
    let packet = Packet::new(PacketType::Video, 0, payload).unwrap();

    c.bench_function("packet_serialize", |b| {
        b.iter(|| {
            let bytes = black_box(&packet).to_bytes();
            black_box(bytes);
        });
    });
}

fn bench_packet_deserialize(c: &mut Criterion) {
    let payload = Bytes::from(vec![0u8; 1400]);
    let packet = Packet::new(PacketType::Video, 0, payload).unwrap();
    let bytes = packet.to_bytes();

    c.bench_function("packet_deserialize", |b| {
        b.iter(|| {
            let packet = Packet::from_bytes(black_box(&bytes)).unwrap();
            black_box(packet);
        });
    });
}

fn bench_frame_chunking(c: &mut Criterion) {
    let frame = vec![0u8; 256 * 1024];

    let mut group = c.benchmark_group("frame_chunking");
    group.throughput(Throughput::Bytes(frame.len() as u64));
    group.bench_function("chunk_256k_frame", |b| {
        b.iter(|| {
            let chunks = chunk_frame(1, black_box(&frame), 0, true, MAX_CHUNK_DATA).unwrap();
            black_box(chunks);
        });
    });
    group.finish();
}

fn bench_frame_reassembly(c: &mut Criterion) {
    let frame = vec![0u8; 256 * 1024];
    let chunks = chunk_frame(1, &frame, 0, true, MAX_CHUNK_DATA).unwrap();

    let mut group = c.benchmark_group("frame_reassembly");
    group.throughput(Throughput::Bytes(frame.len() as u64));
    group.bench_function("reassemble_256k_frame", |b| {
        b.iter(|| {
            let mut assembler = FrameAssembler::new();
            for chunk in &chunks {
                let header = ChunkHeader::decode(chunk).unwrap();
                let result = assembler.push(&header, &chunk[CHUNK_HEADER_SIZE..]).unwrap();
                black_box(result);
            }
        });
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_packet_serialize,
    bench_packet_deserialize,
    bench_frame_chunking,
    bench_frame_reassembly
);
criterion_main!(benches);
