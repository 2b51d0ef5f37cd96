use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use moonlink::{ClassInfo, ClassRef, Lua, NativeType, NativeValue, ParamInfo};

fn math_class() -> ClassRef {
    let mut builder = ClassInfo::builder("Bench.Math");
    // Decoys declared ahead of the overload that matches numbers
    for decoy in [NativeType::Bool, NativeType::String, NativeType::class("Bench.Math")] {
        builder = builder.static_method(
            "Add",
            vec![ParamInfo::new("a", decoy.clone()), ParamInfo::new("b", decoy)],
            NativeType::Void,
            |_| Ok(NativeValue::Null),
        );
    }
    builder
        .static_method(
            "Add",
            vec![
                ParamInfo::new("a", NativeType::I32),
                ParamInfo::new("b", NativeType::I32),
            ],
            NativeType::I32,
            |inv| {
                let a = inv.arg(0).as_i32().unwrap_or(0);
                let b = inv.arg(1).as_i32().unwrap_or(0);
                Ok(NativeValue::I32(a.wrapping_add(b)))
            },
        )
        .static_method(
            "Sum",
            vec![ParamInfo::params("values", NativeType::I32)],
            NativeType::I64,
            |inv| {
                let total = inv
                    .arg(0)
                    .as_object()
                    .and_then(|o| o.array_items())
                    .map(|items| items.read().iter().filter_map(NativeValue::as_i64).sum())
                    .unwrap_or(0);
                Ok(NativeValue::I64(total))
            },
        )
        .build()
}

fn bench_overload_dispatch(c: &mut Criterion) {
    let mut group = c.benchmark_group("overload_dispatch");
    let mut lua = Lua::new();
    let class = math_class();
    lua.register_type(class.clone());
    let add = lua.bind_method(&class, "Add", None).unwrap();
    lua.register_function("add", &add).unwrap();
    let args = [NativeValue::I32(2), NativeValue::I32(3)];

    group.bench_function("cached_plan", |b| {
        b.iter(|| lua.call_global("add", black_box(&args)).unwrap());
    });

    group.bench_function("full_resolution", |b| {
        b.iter(|| {
            add.invalidate();
            lua.call_global("add", black_box(&args)).unwrap()
        });
    });

    group.finish();
}

fn bench_params_arrays(c: &mut Criterion) {
    let mut group = c.benchmark_group("params_array");
    let mut lua = Lua::new();
    let class = math_class();
    lua.register_type(class.clone());
    let sum = lua.bind_method(&class, "Sum", None).unwrap();
    lua.register_function("sum", &sum).unwrap();

    for n in [1usize, 8, 64] {
        let args: Vec<NativeValue> = (0..n as i32).map(NativeValue::I32).collect();
        group.bench_with_input(BenchmarkId::new("args", n), &args, |b, args| {
            b.iter(|| lua.call_global("sum", black_box(args)).unwrap());
        });
    }

    group.finish();
}

fn bench_member_access(c: &mut Criterion) {
    let mut lua = Lua::new();
    lua.register_type(math_class());
    lua.import_type("Bench.Math").unwrap();

    c.bench_function("type_proxy_member_lookup", |b| {
        b.iter(|| {
            let state = lua.state_mut();
            state.get_global("Math").unwrap();
            state.get_field(-1, black_box("Add")).unwrap();
            state.pop(2);
        });
    });
}

criterion_group!(
    benches,
    bench_overload_dispatch,
    bench_params_arrays,
    bench_member_access
);
criterion_main!(benches);
