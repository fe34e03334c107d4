//! HTN planner demo runner.
//!
//! Builds a built-in travel domain programmatically (the planner core has no
//! text syntax) and prints the plans for a goal, as text or JSON.

use anyhow::{bail, Result};
use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};

use htn_logic::{RuleSet, TermFactory, TermId};
use htn_plan::{Domain, DomainError, DomainLoader, MethodType, Planner};

#[derive(Parser)]
#[command(name = "htnplan", about = "HTN planner demo", version)]
struct Cli {
    /// Destination for the travel goal
    #[arg(long, default_value = "park")]
    dest: String,

    /// Enumerate every plan instead of the first
    #[arg(long)]
    all: bool,

    /// Print plans as JSON
    #[arg(long)]
    json: bool,

    /// Memory budget for the search, in bytes
    #[arg(long, default_value_t = 16 << 20)]
    budget: usize,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

/// The classic travel domain: walk when the destination is close and the
/// weather is good, otherwise ride a taxi if the fare is affordable.
struct TravelDemo;

impl DomainLoader for TravelDemo {
    fn load(
        &self,
        factory: &mut TermFactory,
        domain: &mut Domain,
        state: &mut RuleSet,
    ) -> Result<(), DomainError> {
        let p = factory.variable("p");
        let from = factory.variable("from");
        let to = factory.variable("to");
        let fare = factory.variable("fare");

        let at_from = factory.functor("at", &[p, from]);
        let at_to = factory.functor("at", &[p, to]);

        let walk = factory.functor("walk", &[p, from, to]);
        domain.add_operator(factory, walk, vec![at_to], vec![at_from], false)?;

        let ride = factory.functor("rideTaxi", &[p, from, to]);
        domain.add_operator(factory, ride, vec![at_to], vec![at_from], false)?;

        let paid = factory.functor("paid", &[fare]);
        let pay = factory.functor("payDriver", &[fare]);
        domain.add_operator(factory, pay, vec![paid], vec![], false)?;

        // travel(?p,?to) if(at(?p,?from), walkingDistance(?from,?to))
        //                do(walk(?p,?from,?to))
        let travel = factory.functor("travel", &[p, to]);
        let walking = factory.functor("walkingDistance", &[from, to]);
        domain.add_method(
            travel,
            vec![at_from, walking],
            vec![walk],
            MethodType::Normal,
            false,
        );

        // travel(?p,?to) else if(at(?p,?from), distance(?from,?to,?d),
        //                        cash(?m), is(?fare, +(2,?d)), >=(?m,?fare))
        //                     do(rideTaxi(?p,?from,?to), payDriver(?fare))
        let d = factory.variable("d");
        let m = factory.variable("m");
        let dist = factory.functor("distance", &[from, to, d]);
        let cash = factory.functor("cash", &[m]);
        let two = factory.int_constant(2);
        let base_plus = factory.functor("+", &[two, d]);
        let fare_is = factory.functor("is", &[fare, base_plus]);
        let affordable = factory.functor(">=", &[m, fare]);
        domain.add_method(
            travel,
            vec![at_from, dist, cash, fare_is, affordable],
            vec![ride, pay],
            MethodType::Normal,
            true,
        );

        // walkingDistance(?from,?to) :- weather(good), distance(?from,?to,?d),
        //                               =<(?d, 3).
        let good = factory.constant("good");
        let weather_good = factory.functor("weather", &[good]);
        let three = factory.int_constant(3);
        let close = factory.functor("=<", &[d, three]);
        state.add_rule(walking, vec![weather_good, dist, close]);

        let me = factory.constant("me");
        let home = factory.constant("home");
        let at_home = factory.functor("at", &[me, home]);
        state.add_fact(at_home);
        state.add_fact(weather_good);

        for (place, length) in [("park", 2), ("uptown", 8)] {
            let place = factory.constant(place);
            let length = factory.int_constant(length);
            let fact = factory.functor("distance", &[home, place, length]);
            state.add_fact(fact);
        }
        let twenty = factory.int_constant(20);
        let cash_fact = factory.functor("cash", &[twenty]);
        state.add_fact(cash_fact);

        Ok(())
    }
}

fn print_plans(
    factory: &TermFactory,
    plans: &[(Vec<TermId>, String)],
    out_of_memory: bool,
    json: bool,
) -> Result<()> {
    if json {
        let rendered: Vec<serde_json::Value> = plans
            .iter()
            .map(|(plan, facts)| {
                serde_json::json!({
                    "plan": plan
                        .iter()
                        .map(|t| factory.term_to_string(*t))
                        .collect::<Vec<_>>(),
                    "finalFacts": facts,
                })
            })
            .collect();
        let doc = serde_json::json!({
            "solutions": rendered,
            "outOfMemory": out_of_memory,
        });
        println!("{}", serde_json::to_string_pretty(&doc)?);
    } else {
        for (index, (plan, facts)) in plans.iter().enumerate() {
            println!("plan {}: [{}]", index + 1, factory.display_list(plan));
            println!("  facts: {facts}");
        }
        if out_of_memory {
            println!("(search ran out of memory; the last plan is partial)");
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    fmt().with_env_filter(filter).with_target(false).init();

    let mut factory = TermFactory::new();
    let mut domain = Domain::new();
    let mut state = RuleSet::new();
    TravelDemo.load(&mut factory, &mut domain, &mut state)?;
    let planner = Planner::new(domain);

    let me = factory.constant("me");
    let dest = factory.constant(&cli.dest);
    let goal = factory.functor("travel", &[me, dest]);
    tracing::info!(goal = %factory.display(goal), budget = cli.budget, "planning");

    let mut plans: Vec<(Vec<TermId>, String)> = Vec::new();
    let out_of_memory;
    if cli.all {
        let report = planner.find_all_plans(&mut factory, &state, &[goal], cli.budget);
        out_of_memory = report.out_of_memory;
        if report.solutions.is_empty() {
            let failure = report.failure.as_ref();
            let context: Vec<String> = failure
                .map(|f| {
                    f.failure_context
                        .iter()
                        .map(|t| factory.term_to_string(*t))
                        .collect()
                })
                .unwrap_or_default();
            bail!("no plan reaches `{}`; deepest failure at {context:?}", cli.dest);
        }
        for solution in &report.solutions {
            plans.push((
                solution.plan.clone(),
                solution.final_state.to_string_facts(&factory),
            ));
        }
    } else {
        match planner.find_plan(&mut factory, &state, &[goal], cli.budget) {
            Some(solution) => {
                out_of_memory = factory.out_of_memory();
                plans.push((
                    solution.plan.clone(),
                    solution.final_state.to_string_facts(&factory),
                ));
            }
            None => bail!("no plan reaches `{}`", cli.dest),
        }
    }

    print_plans(&factory, &plans, out_of_memory, cli.json)
}
