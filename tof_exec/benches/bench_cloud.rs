//! # Point Cloud Benchmark

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use comms_if::eqpt::tof::{RawFrame, RobotPose, TOF_XS};
use tof_lib::{
    calib::AngleTables,
    cloud::{projection::project_frame, scan::MAX_POINTS},
    mount::MountTable,
};

fn cloud_benchmark(c: &mut Criterion) {
    // ---- Angle tables ----

    c.bench_function("AngleTables::new", |b| {
        b.iter(|| AngleTables::new().unwrap())
    });

    // ---- Projection ----

    let tables = AngleTables::new().unwrap();
    let mounts = MountTable::default();
    let mount = mounts.get(2).unwrap();

    // A sloped floor with some holes, so that the neighbourhood filter has work to do
    let mut frame = RawFrame::new(2, RobotPose::default());
    for (i, d) in frame.depth_mut().iter_mut().enumerate() {
        let (x, y) = (i % TOF_XS, i / TOF_XS);
        *d = if (x * 7 + y * 13) % 11 == 0 {
            0
        } else {
            (400 + y * 20 + x) as u16
        };
    }

    let mut points = Vec::with_capacity(MAX_POINTS);

    c.bench_function("project_frame", |b| {
        b.iter(|| {
            points.clear();
            project_frame(
                black_box(frame.depth()),
                &tables,
                mount,
                (0.0, 0.0),
                &mut points,
            )
        })
    });
}

criterion_group!(benches, cloud_benchmark);
criterion_main!(benches);
