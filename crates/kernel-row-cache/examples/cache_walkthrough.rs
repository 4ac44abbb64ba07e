//! Drive a kernel-row cache the way a decomposition solver would.
//!
//! Run:
//!   cargo run -p kernel-row-cache --example cache_walkthrough

use kernel_row_cache::{
    CacheParameter, CachedKernel, KernelParameter, KernelType, SparseKernel, SvmNode,
};

fn point(x1: f64, x2: f64) -> Vec<SvmNode> {
    vec![
        SvmNode {
            index: 1,
            value: x1,
        },
        SvmNode {
            index: 2,
            value: x2,
        },
    ]
}

fn main() {
    let x: Vec<Vec<SvmNode>> = (0..200)
        .map(|i| {
            let t = i as f64 / 200.0;
            point(t.cos(), (3.0 * t).sin())
        })
        .collect();

    let kernel = SparseKernel::new(
        &x,
        &KernelParameter {
            kernel_type: KernelType::Rbf,
            gamma: 0.5,
            ..Default::default()
        },
    );
    let param = CacheParameter {
        num_threads: 4,
        ..Default::default()
    };
    let mut ck = CachedKernel::new(kernel, x.len(), &param).expect("cache setup failed");

    let mut gradient_norm = 0.0;
    for iteration in 0..50i64 {
        ck.cache_mut().set_time(iteration);
        let working_set: Vec<usize> = (0..8).map(|k| (iteration as usize * 5 + k * 23) % 200).collect();
        ck.cache_rows(&working_set);

        let active = ck.cache().tables().active_docs().to_vec();
        for &i in &working_set {
            let row = ck.get_row(i, Some(&active), false);
            gradient_norm += active.iter().map(|&j| row[j]).sum::<f64>();
        }

        if iteration % 10 == 9 {
            let removed = ck.shrink(|d| d % 7 != 0, 5);
            println!(
                "iteration {:>2}: removed {} docs, {} active, room for {} rows",
                iteration,
                removed,
                ck.cache().activenum(),
                ck.cache().max_elems()
            );
        }
    }

    println!("accumulated row mass {:.3}", gradient_norm);
    let stats = ck.stats();
    println!(
        "hits={} misses={} rows_cached={} evictions={} hit_rate={:.3}",
        stats.hits,
        stats.misses,
        stats.rows_cached,
        stats.evictions,
        stats.hit_rate()
    );
}
