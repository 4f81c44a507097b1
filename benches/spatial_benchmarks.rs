use criterion::{Criterion, black_box, criterion_group, criterion_main};
use geostore::{DB, Point};

fn benchmark_basic_operations(c: &mut Criterion) {
    let mut group = c.benchmark_group("basic_operations");

    let db = DB::memory().unwrap();

    group.bench_function("single_insert", |b| {
        let mut counter = 0;
        b.iter(|| {
            let key = format!("key:{counter}");
            let value = format!("value:{counter}");
            counter += 1;
            db.insert(black_box(&key), black_box(value.as_bytes()), None)
                .unwrap()
        })
    });

    db.insert("benchmark_key", b"benchmark_value", None)
        .unwrap();
    group.bench_function("single_get", |b| {
        b.iter(|| db.get(black_box("benchmark_key")).unwrap())
    });

    group.finish();
}

fn benchmark_spatial_operations(c: &mut Criterion) {
    let mut group = c.benchmark_group("spatial_operations");

    let db = DB::memory().unwrap();

    group.bench_function("spatial_point_insert", |b| {
        let mut counter = 0;
        b.iter(|| {
            let lat = 40.7128 + ((counter % 1000) as f64 * 0.001);
            let lon = -74.0060 + ((counter % 1000) as f64 * 0.001);
            let point = Point::new(lat, lon).unwrap();
            let data = format!("data:{counter}");
            counter += 1;
            db.insert_point(
                black_box("spatial_bench"),
                black_box(&point),
                black_box(data.as_bytes()),
                None,
            )
            .unwrap()
        })
    });

    // Setup data for spatial queries
    let query_db = DB::memory().unwrap();
    for i in 0..1000 {
        let lat = 40.7128 + (i as f64 * 0.0001);
        let lon = -74.0060 + (i as f64 * 0.0001);
        let point = Point::new(lat, lon).unwrap();
        query_db
            .insert_point("query_bench", &point, format!("data:{i}").as_bytes(), None)
            .unwrap();
    }
    let center = Point::new(40.7128, -74.0060).unwrap();

    group.bench_function("find_nearby_1km", |b| {
        b.iter(|| {
            query_db
                .find_nearby(
                    black_box("query_bench"),
                    black_box(&center),
                    black_box(1_000.0),
                    black_box(100),
                )
                .unwrap()
        })
    });

    group.bench_function("count_within_distance_1km", |b| {
        b.iter(|| {
            query_db
                .count_within_distance(black_box("query_bench"), black_box(&center), 1_000.0)
                .unwrap()
        })
    });

    group.bench_function("find_within_bounds", |b| {
        b.iter(|| {
            query_db
                .find_within_bounds(black_box("query_bench"), 40.70, -74.01, 40.75, -73.95, 100)
                .unwrap()
        })
    });

    group.finish();
}

fn benchmark_trajectory_operations(c: &mut Criterion) {
    let mut group = c.benchmark_group("trajectory_operations");

    let db = DB::memory().unwrap();
    let route: Vec<(Point, f64)> = (0..100)
        .map(|i| {
            (
                Point::new(40.7128 + i as f64 * 0.0001, -74.0060).unwrap(),
                1_640_995_200.0 + i as f64,
            )
        })
        .collect();

    group.bench_function("insert_trajectory_100", |b| {
        let mut counter = 0;
        b.iter(|| {
            let series = format!("vehicle:{counter}");
            counter += 1;
            db.insert_trajectory(black_box(&series), black_box(&route))
                .unwrap()
        })
    });

    db.insert_trajectory("vehicle:fixed", &route).unwrap();
    group.bench_function("query_trajectory_window", |b| {
        b.iter(|| {
            db.query_trajectory(
                black_box("vehicle:fixed"),
                black_box(1_640_995_220.0),
                black_box(1_640_995_280.0),
            )
            .unwrap()
        })
    });

    group.finish();
}

criterion_group!(
    benches,
    benchmark_basic_operations,
    benchmark_spatial_operations,
    benchmark_trajectory_operations
);
criterion_main!(benches);
