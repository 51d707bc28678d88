use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use double_buffered_reader::DoubleBufferedReader;
use std::io::{self, Cursor, Read};

const SOURCE_SIZE: usize = 8 * 1024 * 1024;

fn bench_throughput(c: &mut Criterion) {
    let data: Vec<u8> = (0..SOURCE_SIZE).map(|i| (i % 251) as u8).collect();
    let mut group = c.benchmark_group("double_buffered_read");
    group.throughput(Throughput::Bytes(SOURCE_SIZE as u64));
    group.sample_size(10);

    group.bench_function("direct", |b| {
        b.iter(|| {
            let mut source = Cursor::new(&data[..]);
            io::copy(&mut source, &mut io::sink()).unwrap()
        })
    });

    for &buffer_size in &[4 * 1024usize, 64 * 1024, 1024 * 1024] {
        group.bench_with_input(
            BenchmarkId::from_parameter(buffer_size),
            &buffer_size,
            |b, &buffer_size| {
                b.iter(|| {
                    let mut reader =
                        DoubleBufferedReader::new(Cursor::new(data.clone()), buffer_size).unwrap();
                    let mut sink = vec![0u8; 32 * 1024];
                    let mut total = 0;
                    loop {
                        let n = reader.read(&mut sink).unwrap();
                        if n == 0 {
                            break;
                        }
                        total += n;
                    }
                    total
                })
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_throughput);
criterion_main!(benches);
