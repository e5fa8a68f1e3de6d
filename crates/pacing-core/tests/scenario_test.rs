//! End-to-end pacing scenarios against the built-in solver.
//!
//! The 1 km solve runs by default. Longer routes take minutes in debug
//! builds; run them with:
//! cargo test --release -p pacing-core --test scenario_test -- --ignored

use pacing_core::{
    AthleteParameters, AugmentedLagrangianSolver, IntegrationScheme, NegativeSplit, PacingPlan,
    ProblemAssembler, ProblemConfig, RouteData, RouteProfile, State, WarmStartConfig,
};

const BOUND_TOL: f64 = 1e-2;

fn flat_route(length: f64, spacing: f64) -> RouteData {
    let n = (length / spacing) as usize + 1;
    RouteData {
        distance: (0..n).map(|i| i as f64 * spacing).collect(),
        elevation: vec![50.0; n],
        friction: vec![0.004; n],
    }
}

fn hilly_route() -> RouteData {
    let distance: Vec<f64> = (0..=500).map(|i| i as f64 * 10.0).collect();
    let elevation = distance
        .iter()
        .map(|d| 40.0 * (d / 800.0).sin() + 15.0 * (d / 230.0).cos())
        .collect();
    RouteData {
        friction: vec![0.004; distance.len()],
        distance,
        elevation,
    }
}

/// Warm start with `dt_s` seconds per node. Steps beyond a few seconds
/// diverge when accelerating from 1 m/s.
fn warm_start(dt_s: f64) -> WarmStartConfig {
    WarmStartConfig {
        dt_s,
        ..WarmStartConfig::default()
    }
}

/// Speed at which propulsive power equals resistive power on the flat.
fn terminal_speed(athlete: &AthleteParameters, friction: f64, power: f64) -> f64 {
    let resist = |v: f64| {
        let m = athlete.total_mass();
        friction * m * athlete.gravity * v
            + athlete.b0 * v
            + athlete.b1 * v * v
            + 0.5 * athlete.drag_coefficient * athlete.air_density * athlete.frontal_area_m2 * v.powi(3)
    };
    let (mut lo, mut hi) = (0.1, 40.0);
    for _ in 0..100 {
        let mid = 0.5 * (lo + hi);
        if resist(mid) < athlete.drivetrain_efficiency * power {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    0.5 * (lo + hi)
}

fn solve(
    route: &RouteProfile,
    athlete: &AthleteParameters,
    config: &ProblemConfig,
    warm: &WarmStartConfig,
) -> PacingPlan {
    ProblemAssembler::new(route, athlete, config)
        .plan(
            State::new(0.0, 1.0, athlete.w_prime),
            warm,
            &AugmentedLagrangianSolver::default(),
        )
        .expect("solve")
}

fn assert_plan_invariants(plan: &PacingPlan, route: &RouteProfile, athlete: &AthleteParameters, config: &ProblemConfig) {
    let n = plan.len();
    assert!(n >= 2);
    assert_eq!(plan.distance[0], route.start());
    assert!((plan.distance[n - 1] - route.finish()).abs() < 1.0);
    assert_eq!(plan.w_bal[0], athlete.w_prime);

    for k in 0..n {
        assert!(plan.w_bal[k] >= -BOUND_TOL && plan.w_bal[k] <= athlete.w_prime + BOUND_TOL);
        assert!(plan.speed[k] >= config.min_speed_mps - BOUND_TOL);
        assert!(plan.speed[k] <= config.max_speed_mps + BOUND_TOL);
        assert!(plan.power[k] >= -BOUND_TOL);
        let ceiling = athlete.max_power(plan.w_bal[k]);
        assert!(
            plan.power[k] <= ceiling + 1.0,
            "node {}: power {} above ceiling {}",
            k,
            plan.power[k],
            ceiling
        );
    }
}

#[test]
fn test_lap_expansion_builds_usable_profile() {
    let data = flat_route(2_000.0, 5.0).expand_laps(3).unwrap();
    let route = RouteProfile::new(&data).unwrap();
    assert_eq!(route.gradient().len(), route.distance().len());
    assert_eq!(*route.gradient().last().unwrap(), 0.0);
    assert!(route.distance().windows(2).all(|w| w[1] - w[0] >= 0.6));
    assert!((route.finish() - 6_000.0).abs() < 1e-9);
}

#[test]
fn test_short_flat_route_solves_within_bounds() {
    let route = RouteProfile::new(&flat_route(1_000.0, 5.0)).unwrap();
    let athlete = AthleteParameters::default();
    let config = ProblemConfig::default();
    let warm = warm_start(2.0);
    let plan = solve(&route, &athlete, &config, &warm);
    assert_plan_invariants(&plan, &route, &athlete, &config);

    assert!(plan.finish_time_s.is_finite() && plan.finish_time_s > 0.0);
    assert!(
        plan.finish_time_s < plan.diagnostics.time_init_guess_s,
        "finish {} not faster than warm start {}",
        plan.finish_time_s,
        plan.diagnostics.time_init_guess_s
    );
    // A short effort should spend most of the reserve.
    let spent = athlete.w_prime - plan.w_bal[plan.len() - 1];
    assert!(spent > 0.75 * athlete.w_prime, "only {} J of W' spent", spent);
}

#[test]
#[ignore]
fn test_flat_route_settles_near_critical_power() {
    let route = RouteProfile::new(&flat_route(10_000.0, 10.0)).unwrap();
    let athlete = AthleteParameters::default();
    let config = ProblemConfig::default();
    let plan = solve(&route, &athlete, &config, &WarmStartConfig::default());
    assert_plan_invariants(&plan, &route, &athlete, &config);

    let n = plan.len();
    let middle = &plan.power[n / 4..3 * n / 4];
    let mean = middle.iter().sum::<f64>() / middle.len() as f64;
    assert!(
        (mean - athlete.cp).abs() < 0.15 * athlete.cp,
        "mid-race power {} far from CP",
        mean
    );

    let v_term = terminal_speed(&athlete, 0.004, athlete.cp);
    let expected = route.length() / v_term;
    assert!(
        (plan.finish_time_s - expected).abs() < 0.1 * expected,
        "finish {} vs steady-state estimate {}",
        plan.finish_time_s,
        expected
    );
}

#[test]
#[ignore]
fn test_euler_and_rk4_agree_on_finish_time() {
    let route = RouteProfile::new(&hilly_route()).unwrap();
    let athlete = AthleteParameters::default();

    let times: Vec<f64> = [IntegrationScheme::Euler, IntegrationScheme::Rk4]
        .into_iter()
        .map(|scheme| {
            let config = ProblemConfig {
                integration_method: scheme,
                ..ProblemConfig::default()
            };
            let plan = solve(&route, &athlete, &config, &warm_start(1.0));
            assert_plan_invariants(&plan, &route, &athlete, &config);
            plan.finish_time_s
        })
        .collect();

    let rel = (times[0] - times[1]).abs() / times[1];
    assert!(rel < 0.05, "Euler {} vs RK4 {}", times[0], times[1]);
}

#[test]
#[ignore]
fn test_negative_split_corridor_holds() {
    let route = RouteProfile::new(&hilly_route()).unwrap();
    let athlete = AthleteParameters::default();
    let split = NegativeSplit::from_percent(80.0, 20.0).unwrap();
    let config = ProblemConfig {
        negative_split: Some(split),
        ..ProblemConfig::default()
    };
    let plan = solve(&route, &athlete, &config, &warm_start(2.0));
    assert_plan_invariants(&plan, &route, &athlete, &config);

    let n = plan.len() - 1;
    for (k, w_bal) in plan.w_bal.iter().enumerate() {
        let floor = split.lower_bound(athlete.w_prime, k, n);
        assert!(*w_bal >= floor - 1.0, "node {}: {} below corridor {}", k, w_bal, floor);
    }
}
