//! Harmonic chain example — demonstrates a full engine lifecycle:
//! configuration load, energy/gradient evaluation, Verlet integration,
//! and recentering.

use moldyn::{
    initialize_engine_from_value, recenter, standard_registry, ComputeMode, IntegratorType, Vec3,
    VecArray,
};
use serde_json::json;

fn main() {
    let n_atom = 10;
    let registry = standard_registry().expect("builtin registration");

    let id: Vec<[usize; 2]> = (0..n_atom - 1).map(|i| [i, i + 1]).collect();
    let config = json!({
        "n_atom": n_atom,
        "potential": [
            { "name": "dist_spring",
              "arguments": ["pos"],
              "id": id,
              "equil_dist": vec![1.0f32; n_atom - 1],
              "spring_const": vec![100.0f32; n_atom - 1] }
        ]
    });
    let mut engine = initialize_engine_from_value(&config, &registry).expect("load engine");

    // Stretch the chain slightly so it oscillates.
    let mut mom = VecArray::new(3, n_atom);
    for e in 0..n_atom {
        engine
            .pos_mut()
            .output
            .store_vec3(e, Vec3::new(1.05 * e as f32, 0.0, 0.0));
    }

    engine
        .compute(ComputeMode::PotentialAndDeriv)
        .expect("initial evaluation");
    println!("Initial potential: {:.6}", engine.potential);

    let dt = 1e-3;
    let total_steps = 5_000;
    println!("step     potential    kinetic      total");
    for step in 0..total_steps {
        engine
            .integration_cycle(&mut mom, dt, 1e6, IntegratorType::Verlet)
            .expect("integration step");

        if step % 500 == 0 {
            engine
                .compute(ComputeMode::PotentialAndDeriv)
                .expect("evaluation");
            let kinetic: f32 = (0..n_atom)
                .map(|e| 0.5 * mom.load_vec3(e).norm_squared())
                .sum();
            println!(
                "{step:6}   {:10.6}   {kinetic:10.6}   {:10.6}",
                engine.potential,
                engine.potential + kinetic
            );
        }
    }

    let pos = &mut engine.pos_mut().output;
    recenter(pos, false, n_atom);
    println!("\nRecentered first atom: {:?}", pos.load_vec3(0));
}
