use http::StatusCode;
use kestrel::{
    mutation, query, BoxError, BuildError, InvalidProcedure, Procedure, ProcedureKind, Procedures,
    Router,
};
use serde_json::json;

mod utils;
use utils::*;

fn answer(name: &'static str, value: u32) -> Procedure {
    query(name, move |_, _: ()| async move { Ok::<_, BoxError>(value) })
}

#[tokio::test]
async fn first_registration_wins() {
    let instance = Router::new()
        .add(answer("answer", 1))
        .add(answer("answer", 2))
        .add(mutation("answer", |_, _: ()| async { Ok::<_, BoxError>(3) }))
        .build()
        .unwrap();

    assert_eq!(instance.procedures().len(), 2);

    let (status, body) = rpc(&instance, get("/_kestrel?__proc=q__answer")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"], json!(1));

    let (_, body) = rpc(&instance, post("/_kestrel?__proc=m__answer", "")).await;
    assert_eq!(body["data"], json!(3));
}

#[test]
fn registration_order_is_stable() {
    let mut procedures = ["zeta", "alpha", "mid", "beta"]
        .into_iter()
        .map(|name| answer(name, 0))
        .collect::<Procedures>();

    let names = |p: &Procedures| {
        p.iter()
            .map(|procedure| procedure.name().to_string())
            .collect::<Vec<_>>()
    };
    assert_eq!(names(&procedures), ["zeta", "alpha", "mid", "beta"]);

    assert!(procedures.exists("mid", ProcedureKind::Query));
    assert!(!procedures.exists("mid", ProcedureKind::Mutation));
    assert!(procedures.remove("mid", ProcedureKind::Query).is_some());
    assert!(procedures.remove("mid", ProcedureKind::Query).is_none());
    assert_eq!(names(&procedures), ["zeta", "alpha", "beta"]);

    assert!(procedures.add(answer("mid", 0)));
    assert!(!procedures.add(answer("zeta", 1)));
    assert_eq!(names(&procedures), ["zeta", "alpha", "beta", "mid"]);
}

#[test]
fn nearest_name() {
    let procedures = ["getUser", "listUsers", "createUser"]
        .into_iter()
        .map(|name| answer(name, 0))
        .collect::<Procedures>();

    let nearest = |name: &str| procedures.find_nearest(name).map(Procedure::name);
    assert_eq!(nearest("getUsr"), Some("getUser"));
    assert_eq!(nearest("listUser"), Some("listUsers"));
    assert_eq!(nearest("createuser"), Some("createUser"));
    assert_eq!(Procedures::new().find_nearest("getUser").map(Procedure::name), None);
}

#[tokio::test]
async fn removed_before_build() {
    let mut router = Router::new().add(answer("keep", 1)).add(answer("drop", 2));
    assert!(router.remove("drop", ProcedureKind::Query).is_some());
    assert!(router.remove("drop", ProcedureKind::Query).is_none());
    assert_eq!(router.procedures().len(), 1);

    let instance = router.build().unwrap();
    let (status, _) = rpc(&instance, get("/_kestrel?__proc=q__drop")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[test]
fn build_reports_every_invalid_procedure() {
    let err = Router::new()
        .add(answer("fine", 0))
        .add(answer("has space", 0))
        .add(answer("", 0))
        .add(
            mutation("echo", |_, s: String| async move { Ok::<_, BoxError>(s) })
                .with_raw_payload::<String>(),
        )
        .build()
        .unwrap_err();

    let BuildError::InvalidProcedures(invalid) = &err else {
        panic!("expected invalid procedures, got {err:?}");
    };

    assert_eq!(invalid.len(), 3);
    assert!(matches!(
        &invalid[0],
        InvalidProcedure::Name { name, kind: ProcedureKind::Query, .. } if name == "has space"
    ));
    assert!(matches!(&invalid[1], InvalidProcedure::Name { name, .. } if name.is_empty()));
    assert!(matches!(
        &invalid[2],
        InvalidProcedure::RawPayload { name, kind: ProcedureKind::Mutation, .. } if name == "echo"
    ));

    let message = err.to_string();
    assert!(
        message.starts_with("invalid procedures: invalid procedure name `has space`"),
        "{message}"
    );
    assert!(message.contains("`with_raw_payload` was called on mutation `echo`"), "{message}");
}

#[test]
fn router_shortcuts() {
    let router = Router::new()
        .query("ping", |_, _: ()| async { Ok::<_, BoxError>("pong") })
        .mutation("ping", |_, _: ()| async { Ok::<_, BoxError>("pong") });

    let kinds = router
        .procedures()
        .iter()
        .map(|p| (p.name(), p.kind()))
        .collect::<Vec<_>>();
    assert_eq!(
        kinds,
        [("ping", ProcedureKind::Query), ("ping", ProcedureKind::Mutation)]
    );
}
