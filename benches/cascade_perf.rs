
use criterion::{BatchSize, BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use ndarray::Array2;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;

use seisrisk::config::Imtls;
use seisrisk::hazard_maps::{compute_hazard_maps, make_hmap};
use seisrisk::pmap::{MutexWeights, ProbabilityMap};
use seisrisk::reinsurance::{by_event, by_policy_event};
use seisrisk::types::SiteId;

use fixtures::{LARGE, MEDIUM, SMALL, make_contexts, make_losses, make_policies, make_treaties};

// ── Group 1: by_policy_event — end-to-end cessions per scenario ─────────────

fn bench_by_policy_event(c: &mut Criterion) {
    let mut group = c.benchmark_group("by_policy_event");
    let treaties = make_treaties(3);
    for (name, scenario) in [("small", &SMALL), ("medium", &MEDIUM), ("large", &LARGE)] {
        if name == "large" {
            group.sample_size(10);
        }
        let policies = make_policies(scenario.policies, &treaties, 42);
        let losses = make_losses(scenario, 42);
        group.throughput(Throughput::Elements(losses.len() as u64));
        group.bench_function(BenchmarkId::from_parameter(name), |b| {
            b.iter(|| by_policy_event(&losses, &policies, &treaties))
        });
    }
    group.finish();
}

// ── Group 2: cascade_depth — event aggregation against treaty count ─────────

fn bench_cascade_depth(c: &mut Criterion) {
    let mut group = c.benchmark_group("cascade_depth");
    let losses = make_losses(&MEDIUM, 7);
    for &cat_layers in &[1usize, 4, 8, 12] {
        let treaties = make_treaties(cat_layers);
        let policies = make_policies(MEDIUM.policies, &treaties, 7);
        let (claims, _) = by_policy_event(&losses, &policies, &treaties).expect("valid fixture");
        group.throughput(Throughput::Elements(claims.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(treaties.len()), &treaties, |b, treaties| {
            b.iter(|| by_event(&claims, treaties))
        });
    }
    group.finish();
}

// ── Group 3: pmap_update — independent ruptures into a probability map ──────

fn bench_pmap_update(c: &mut Criterion) {
    let mut group = c.benchmark_group("pmap_update");
    let (sites, levels, groups) = (1_000usize, 40usize, 4usize);
    let no_mutex = MutexWeights::new();
    for &contexts in &[1_000usize, 10_000, 100_000] {
        let (poes, invs, ctx) = make_contexts(sites, contexts, levels, groups, 42);
        group.throughput(Throughput::Elements(contexts as u64));
        group.bench_with_input(BenchmarkId::from_parameter(contexts), &contexts, |b, _| {
            b.iter_batched(
                || {
                    let sids = (0..sites as u32).map(SiteId).collect();
                    ProbabilityMap::new(sids, levels, groups).fill(1.0)
                },
                |mut pmap| pmap.update(poes.view(), &invs, &ctx, 50.0, &no_mutex).map(|_| pmap),
                BatchSize::LargeInput,
            )
        });
    }
    group.finish();
}

// ── Group 4: hazard_maps — curve interpolation against site count ───────────

fn bench_hazard_maps(c: &mut Criterion) {
    let mut group = c.benchmark_group("hazard_maps");
    let imls: Vec<f64> = (0..20).map(|i| 0.005 * 1.4f64.powi(i)).collect();
    let imtls = Imtls::new(vec![("PGA".to_string(), imls.clone()), ("SA(1.0)".to_string(), imls.clone())]);
    let poes = [0.1, 0.02, 0.01, 0.002];
    for &sites in &[100usize, 1_000, 10_000] {
        let mut rng = ChaCha20Rng::seed_from_u64(42);
        let curves = Array2::from_shape_fn((sites, imls.len()), |(_, l)| {
            rng.random_range(0.6..1.0) * 0.7f64.powi(l as i32)
        });
        group.throughput(Throughput::Elements(sites as u64));
        group.bench_with_input(BenchmarkId::new("compute_hazard_maps", sites), &curves, |b, curves| {
            b.iter(|| compute_hazard_maps(curves.view(), &imls, &poes))
        });

        let sids = (0..sites as u32).map(SiteId).collect();
        let array = ndarray::concatenate![ndarray::Axis(1), curves, curves].insert_axis(ndarray::Axis(2));
        let pmap = ProbabilityMap::from_array(sids, array).expect("valid fixture");
        group.bench_with_input(BenchmarkId::new("make_hmap", sites), &pmap, |b, pmap| {
            b.iter(|| make_hmap(pmap, &imtls, &poes))
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_by_policy_event,
    bench_cascade_depth,
    bench_pmap_update,
    bench_hazard_maps
);
criterion_main!(benches);
