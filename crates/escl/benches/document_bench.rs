//! eSCL 문서 벤치마크
//!
//! 스캔 설정 파싱, 능력/상태 문서 렌더링, 페이지 스트리밍의 처리량을 측정합니다.

use std::sync::Arc;

use airscan_core::config::DeviceConfig;
use airscan_escl::device::DeviceBackend;
use airscan_escl::{Scanner, ScanSettings, SimulatedBackend};
use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

const SCAN_SETTINGS: &str = "<?xml version='1.0' encoding='UTF-8'?>\
<scan:ScanSettings xmlns:scan='http://schemas.hp.com/imaging/escl/2011/05/03' \
xmlns:pwg='http://www.pwg.org/schemas/2010/12/sm'>\
<pwg:Version>2.0</pwg:Version>\
<pwg:ScanRegions><pwg:ScanRegion>\
<pwg:XOffset>0</pwg:XOffset><pwg:YOffset>0</pwg:YOffset>\
<pwg:Width>2550</pwg:Width><pwg:Height>3300</pwg:Height>\
<pwg:ContentRegionUnits>escl:ThreeHundredthsOfInches</pwg:ContentRegionUnits>\
</pwg:ScanRegion></pwg:ScanRegions>\
<pwg:InputSource>Platen</pwg:InputSource>\
<scan:ColorMode>RGB24</scan:ColorMode>\
<scan:XResolution>300</scan:XResolution><scan:YResolution>300</scan:YResolution>\
<pwg:DocumentFormat>image/png</pwg:DocumentFormat>\
</scan:ScanSettings>";

fn scanner(page_bytes: usize) -> Arc<Scanner> {
    let backend = Arc::new(SimulatedBackend::new([DeviceConfig {
        page_bytes,
        ..DeviceConfig::default()
    }]));
    let descriptor = backend.list_devices(false).unwrap().remove(0);
    Scanner::discover(backend, descriptor, 64 * 1024)
}

fn bench_settings_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("scan_settings");
    group.throughput(Throughput::Bytes(SCAN_SETTINGS.len() as u64));
    group.bench_function("parse", |b| {
        b.iter(|| ScanSettings::parse(black_box(SCAN_SETTINGS)).unwrap())
    });
    group.finish();
}

fn bench_documents(c: &mut Criterion) {
    let mut group = c.benchmark_group("documents");

    let scanner = scanner(1024);
    group.bench_function("capabilities", |b| {
        b.iter(|| scanner.capabilities_document().unwrap())
    });

    // 작업 수에 따른 상태 문서 크기
    for jobs in [0usize, 10, 100] {
        let scanner = scanner_with_jobs(jobs);
        group.bench_with_input(BenchmarkId::new("status", jobs), &scanner, |b, scanner| {
            b.iter(|| scanner.status_document())
        });
    }

    group.finish();
}

fn scanner_with_jobs(count: usize) -> Arc<Scanner> {
    let scanner = scanner(1024);
    for _ in 0..count {
        scanner
            .create_job_from_settings(SCAN_SETTINGS, false)
            .unwrap();
    }
    scanner
}

fn bench_page_transfer(c: &mut Criterion) {
    let mut group = c.benchmark_group("page_transfer");

    for page_bytes in [256 * 1024usize, 4 * 1024 * 1024] {
        let scanner = scanner(page_bytes);
        group.throughput(Throughput::Bytes(page_bytes as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(page_bytes),
            &scanner,
            |b, scanner| {
                b.iter(|| {
                    let job = scanner
                        .create_job_from_settings(SCAN_SETTINGS, false)
                        .unwrap();
                    job.begin_transfer().unwrap();
                    let mut sink: Vec<u8> = Vec::with_capacity(page_bytes);
                    job.finish_transfer(&mut sink).unwrap();
                    scanner.purge_jobs(std::time::Duration::ZERO);
                    sink.len()
                })
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_settings_parse, bench_documents, bench_page_transfer);
criterion_main!(benches);
