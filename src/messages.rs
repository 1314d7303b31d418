//! Reply texts sent to users

pub const GREET_NEW: &str = "Привет! Я помогу найти пару во ВКонтакте. Ответь на несколько вопросов.";
pub const GREET_AGAIN: &str = "С возвращением! Уже показанные анкеты больше не попадутся.";

pub const ASK_AGE: &str = "Сколько лет должно быть собеседнику? Введи число от 13 до 99.";
pub const ASK_GENDER: &str = "Кого ищем?\n1 - девушку\n2 - парня";
pub const ASK_CITY: &str = "Введи код города (например, 1 - Москва, 2 - Санкт-Петербург).";
pub const ASK_STATUS: &str = "Семейное положение:\n1 - не женат (не замужем)\n2 - встречается\n3 - помолвлен(а)\n4 - женат (замужем)\n5 - всё сложно";

pub const INVALID_INPUT: &str = "Некорректный ввод, попробуй ещё раз.";
pub const SEARCH_UNAVAILABLE: &str = "Поиск временно недоступен, повтори запрос чуть позже.";
pub const TEMPORARY_ERROR: &str = "Что-то пошло не так, повтори последнюю команду.";

pub const RESULTS_HINT: &str =
    "Напиши \"еще\" для следующей анкеты, \"в избранное\" чтобы сохранить, \"заново\" для нового поиска.";
pub const NO_RESULTS: &str = "По этим параметрам никого не нашлось. Напиши \"заново\", чтобы начать новый поиск.";
pub const NO_MORE_RESULTS: &str = "Анкеты закончились. Напиши \"заново\", чтобы начать новый поиск.";
pub const RESTARTING: &str = "Начинаем поиск заново.";

pub const ADDED_TO_FAVORITES: &str = "Добавил в избранное!";
pub const NOTHING_TO_FAVORITE: &str = "Пока нечего добавлять в избранное.";
pub const FAVORITES_HEADER: &str = "Избранное:";
pub const NO_FAVORITES: &str = "В избранном пока пусто.";
